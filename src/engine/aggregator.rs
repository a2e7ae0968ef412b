//! Weighted aggregation of the panel's parsed answers.
//!
//! The aggregator does not average numbers itself. It hands every successful
//! answer, together with its backend's raw weight, to a single designated
//! authority backend and lets that model perform the weighting. Only when the
//! authority is unavailable does the engine fall back to promoting the
//! highest-weighted single answer, and the decision is tagged accordingly.

use serde_json::json;
use tracing::warn;

use crate::repair::{repair_parse, ParseFailureKind};

use super::caller::BackendCaller;
use super::types::{
    AggregationInput, BackendDescriptor, BackendFailure, CallOutcome, DecisionMethod, EngineError,
    ErrorKind, FinalDecision, ParsedResult, Provenance, TaskPayload,
};

/// Run every call outcome through the response parser, one-to-one.
///
/// Failed calls pass through untouched; successful calls gain either a
/// structured payload or a typed parse error.
pub fn parse_outcomes(
    outcomes: Vec<CallOutcome>,
    expected_field: Option<&str>,
) -> Vec<ParsedResult> {
    outcomes
        .into_iter()
        .map(|outcome| match outcome.raw_text.as_deref() {
            Some(raw) if outcome.is_success() => match repair_parse(raw, expected_field) {
                Ok(payload) => ParsedResult {
                    outcome,
                    payload: Some(payload),
                    parse_error: None,
                },
                Err(failure) => {
                    let kind = match failure.kind {
                        ParseFailureKind::Empty => ErrorKind::EmptyResponse,
                        ParseFailureKind::Malformed => ErrorKind::MalformedResponse,
                    };
                    warn!(
                        backend_id = %outcome.backend_id,
                        kind = kind.as_str(),
                        excerpt = %failure.excerpt,
                        "Backend response did not parse"
                    );
                    ParsedResult {
                        outcome,
                        payload: None,
                        parse_error: Some(kind),
                    }
                }
            },
            _ => ParsedResult {
                outcome,
                payload: None,
                parse_error: None,
            },
        })
        .collect()
}

/// Build the secondary task handed to the authority backend.
///
/// Embeds every successful answer with its backend's raw (un-normalized)
/// weight, plus the original task for context. The authority is expected to
/// perform the weighting itself.
pub fn build_authority_task(original: &TaskPayload, successes: &[&ParsedResult]) -> TaskPayload {
    let responses: Vec<serde_json::Value> = successes
        .iter()
        .map(|r| {
            json!({
                "backend_id": r.outcome.backend_id,
                "weight": r.outcome.weight,
                "response": r.payload,
            })
        })
        .collect();

    let user = format!(
        "You are the final decision aggregator. {count} independent scoring \
         backends answered the task below; each answer is listed with that \
         backend's weight coefficient. Combine them into one decision, \
         weighting each answer by its coefficient, and return only JSON in \
         the same shape as the individual answers.\n\n\
         ORIGINAL TASK:\n{task}\n\n\
         PANEL ANSWERS:\n{answers}",
        count = successes.len(),
        task = original.user,
        answers = serde_json::to_string_pretty(&responses).unwrap_or_else(|_| "[]".into()),
    );

    TaskPayload {
        system: original.system.clone(),
        user,
    }
}

/// Pick the fallback answer: highest weight wins; equal weights break the tie
/// by lexicographically-lowest backend id so repeated runs pick the same one.
pub fn select_best_single<'a>(successes: &[&'a ParsedResult]) -> Option<&'a ParsedResult> {
    successes.iter().copied().reduce(|best, candidate| {
        let (bw, cw) = (best.outcome.weight, candidate.outcome.weight);
        if cw > bw || (cw == bw && candidate.outcome.backend_id < best.outcome.backend_id) {
            candidate
        } else {
            best
        }
    })
}

/// Per-backend failure kinds for hard-failure diagnostics.
fn collect_failures(results: &[ParsedResult]) -> Vec<BackendFailure> {
    results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| BackendFailure {
            backend_id: r.outcome.backend_id.clone(),
            // A non-success with no recorded kind means the call "succeeded"
            // with nothing usable; report it as malformed.
            kind: r.failure_kind().unwrap_or(ErrorKind::MalformedResponse),
        })
        .collect()
}

/// Combine parsed results into one decision via the authority backend, with
/// the best-single fallback when the authority fails.
pub async fn aggregate(
    caller: &BackendCaller,
    authority: &BackendDescriptor,
    input: AggregationInput,
    expected_field: Option<&str>,
) -> Result<FinalDecision, EngineError> {
    let successes: Vec<&ParsedResult> = input.results.iter().filter(|r| r.is_success()).collect();

    if successes.is_empty() {
        return Err(EngineError::NoValidResponses {
            backend_errors: collect_failures(&input.results),
        });
    }

    let authority_task = build_authority_task(&input.task, &successes);
    let outcome = caller.call(authority, &authority_task).await;

    let authority_payload = match (&outcome.error, outcome.raw_text.as_deref()) {
        (None, Some(raw)) => repair_parse(raw, expected_field).ok(),
        _ => None,
    };

    match authority_payload {
        Some(payload) => Ok(FinalDecision {
            payload,
            provenance: Provenance {
                contributing_backends: successes
                    .iter()
                    .map(|r| r.outcome.backend_id.clone())
                    .collect(),
                method: DecisionMethod::PrimaryAggregator,
            },
        }),
        None => {
            warn!(
                authority_id = %authority.id,
                kind = ErrorKind::AuthorityUnavailable.as_str(),
                successes = successes.len(),
                "Authority backend unavailable; degrading to best single answer"
            );

            let best = select_best_single(&successes)
                .expect("successes is non-empty when falling back");
            let payload = best
                .payload
                .clone()
                .expect("successful result always carries a payload");

            Ok(FinalDecision {
                payload,
                provenance: Provenance {
                    contributing_backends: vec![best.outcome.backend_id.clone()],
                    method: DecisionMethod::FallbackBestSingle,
                },
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn backend(id: &str, weight: f64) -> BackendDescriptor {
        BackendDescriptor::new(id, weight, Duration::from_secs(30))
    }

    fn parsed_success(id: &str, weight: f64, payload: serde_json::Value) -> ParsedResult {
        ParsedResult {
            outcome: CallOutcome::succeeded(
                &backend(id, weight),
                payload.to_string(),
                Duration::from_millis(10),
            ),
            payload: Some(payload),
            parse_error: None,
        }
    }

    fn parsed_failure(id: &str, weight: f64, kind: ErrorKind) -> ParsedResult {
        ParsedResult {
            outcome: CallOutcome::failed(&backend(id, weight), kind, Duration::from_millis(10)),
            payload: None,
            parse_error: None,
        }
    }

    #[test]
    fn best_single_prefers_highest_weight() {
        let a = parsed_success("a", 0.3, json!({"v": "a"}));
        let b = parsed_success("b", 0.5, json!({"v": "b"}));
        let refs: Vec<&ParsedResult> = vec![&a, &b];
        assert_eq!(
            select_best_single(&refs).unwrap().outcome.backend_id,
            "b"
        );
    }

    #[test]
    fn best_single_tie_breaks_by_lowest_id() {
        let z = parsed_success("zeta", 0.4, json!({"v": 1}));
        let a = parsed_success("alpha", 0.4, json!({"v": 2}));
        // Registration order has "zeta" first; the tie must still resolve to
        // "alpha" on every run.
        let refs: Vec<&ParsedResult> = vec![&z, &a];
        for _ in 0..10 {
            assert_eq!(
                select_best_single(&refs).unwrap().outcome.backend_id,
                "alpha"
            );
        }
    }

    #[test]
    fn best_single_of_empty_is_none() {
        assert!(select_best_single(&[]).is_none());
    }

    #[test]
    fn authority_task_embeds_weights_and_payloads() {
        let a = parsed_success("a", 0.3, json!({"score": 1}));
        let b = parsed_success("b", 0.5, json!({"score": 2}));
        let refs: Vec<&ParsedResult> = vec![&a, &b];
        let task = build_authority_task(&TaskPayload::new("rate the company"), &refs);

        assert!(task.user.contains("rate the company"));
        assert!(task.user.contains("\"backend_id\": \"a\""));
        assert!(task.user.contains("\"weight\": 0.3"));
        assert!(task.user.contains("\"weight\": 0.5"));
        assert!(task.user.contains("\"score\": 2"));
    }

    #[test]
    fn parse_outcomes_is_one_to_one_and_typed() {
        let outcomes = vec![
            CallOutcome::succeeded(
                &backend("good", 0.5),
                r#"{"v": 1}"#.into(),
                Duration::from_millis(5),
            ),
            CallOutcome::succeeded(
                &backend("garbled", 0.3),
                "not json".into(),
                Duration::from_millis(5),
            ),
            CallOutcome::failed(&backend("down", 0.2), ErrorKind::Timeout, Duration::ZERO),
        ];

        let results = parse_outcomes(outcomes, None);
        assert_eq!(results.len(), 3);
        assert!(results[0].is_success());
        assert_eq!(results[1].parse_error, Some(ErrorKind::MalformedResponse));
        assert_eq!(results[2].failure_kind(), Some(ErrorKind::Timeout));
    }

    #[test]
    fn collect_failures_reports_every_kind() {
        let results = vec![
            parsed_failure("t", 0.2, ErrorKind::Timeout),
            parsed_failure("n", 0.3, ErrorKind::NetworkError),
            ParsedResult {
                outcome: CallOutcome::succeeded(
                    &backend("m", 0.5),
                    "garbage".into(),
                    Duration::ZERO,
                ),
                payload: None,
                parse_error: Some(ErrorKind::MalformedResponse),
            },
        ];
        let failures = collect_failures(&results);
        let kinds: Vec<ErrorKind> = failures.iter().map(|f| f.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ErrorKind::Timeout,
                ErrorKind::NetworkError,
                ErrorKind::MalformedResponse
            ]
        );
    }
}
