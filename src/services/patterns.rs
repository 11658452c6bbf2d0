//! Compound reasoning patterns (spec §4.5, §9): `GroundedDebate`,
//! `IterativeRefinement`, `VotingEnsemble`. Modeled as a tagged variant
//! dispatch over [`PatternKind`] rather than three unrelated traits —
//! the patterns contain no domain logic of their own, only the control
//! flow; every heuristic, persona, and validator comes from the
//! [`Lens`] passed in. Grounded on the teacher's
//! `services::swarm_orchestrator` staged-call shape (sequential model
//! calls composed into one outcome) generalized to the spec's three
//! named strategies.

use std::sync::Arc;

use futures::future::join_all;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::lens::{HeuristicValidator, Persona};
use crate::domain::models::{EventPayload, Lens, PatternKind, PatternResult};
use crate::services::event_bus::EventBus;
use crate::services::memory::Memory;
use crate::services::model_gateway::ModelGateway;
use crate::services::model_router::TaskCategory;

/// Bound on `IterativeRefinement`'s draft/critique/revise loop (spec
/// §4.5 default).
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Confidence floor a pattern result must clear before its attempt is
/// worth caching (spec §4.5 step g).
const EPISODIC_STORE_THRESHOLD: f64 = 0.7;

/// Confidence floor above which a pattern's own effectiveness becomes a
/// long-term learning (spec §4.5 step h).
const LEARNING_STORE_THRESHOLD: f64 = 0.8;

/// Shared context every pattern run receives: the model gateway, the
/// active Lens, and (optionally) Memory for episodic short-circuiting
/// and learning capture.
pub struct PatternContext<'a> {
    pub gateway: &'a ModelGateway,
    pub lens: &'a Lens,
    pub memory: Option<&'a Memory>,
    pub event_bus: Option<&'a EventBus>,
    pub goal_id: Option<&'a str>,
    /// Cheap embedding of `question`, used for the episodic similarity
    /// check and stored alongside a fresh attempt.
    pub question_embedding: Vec<f32>,
}

/// Dispatch on the pattern tag and run it to completion (spec §9
/// "polymorphic patterns... modelled as a tagged variant").
pub async fn run_pattern(kind: PatternKind, question: &str, ctx: &PatternContext<'_>) -> DomainResult<PatternResult> {
    match kind {
        PatternKind::GroundedDebate => grounded_debate(question, ctx).await,
        PatternKind::IterativeRefinement => iterative_refinement(question, ctx, DEFAULT_MAX_ATTEMPTS).await,
        PatternKind::VotingEnsemble => voting_ensemble(question, ctx).await,
    }
}

async fn model_call(ctx: &PatternContext<'_>, category: TaskCategory, prompt: String) -> DomainResult<String> {
    ctx.gateway
        .complete(category, Some(ctx.lens), prompt, ctx.goal_id)
        .await
        .map(|r| r.content)
        .map_err(|e| DomainError::ExecutionFailed(e.to_string()))
}

/// Step (a): episodic cache check. Returns `Some` without consuming a
/// model call when a past attempt clears the similarity threshold (spec
/// §4.5, §8 scenario 5: `calls == 0`, `memory_hit` event emitted).
async fn episodic_short_circuit(question: &str, ctx: &PatternContext<'_>) -> DomainResult<Option<PatternResult>> {
    let Some(memory) = ctx.memory else { return Ok(None) };
    let Some((attempt, similarity)) = memory.episodic_lookup(question, &ctx.question_embedding).await? else {
        return Ok(None);
    };
    if let Some(bus) = ctx.event_bus {
        bus.publish(
            ctx.goal_id,
            EventPayload::EpisodicShortCircuit { goal_id: ctx.goal_id.unwrap_or_default().to_string(), similarity },
        )
        .await;
        bus.publish(
            ctx.goal_id,
            EventPayload::MemoryRetrieved { tier: "episodic".to_string(), key: question.to_string(), hit: true },
        )
        .await;
    }
    let pattern_used = match attempt.pattern_used.as_str() {
        "iterative_refinement" => PatternKind::IterativeRefinement,
        "voting_ensemble" => PatternKind::VotingEnsemble,
        _ => PatternKind::GroundedDebate,
    };
    Ok(Some(PatternResult::new(attempt.result_summary, attempt.confidence, pattern_used, 0)))
}

/// Build a short grounding block from the Lens's highest-priority
/// heuristic examples plus any retrieved RAG passages (spec §4.5 step
/// b). Kept to plain text since the gateway's `ModelProvider` boundary
/// only accepts a prompt string.
async fn build_grounding(question: &str, ctx: &PatternContext<'_>) -> String {
    let mut grounding = String::new();
    for heuristic in ctx.lens.heuristics_by_priority().into_iter().take(3) {
        grounding.push_str(&format!("- {}: {}\n", heuristic.name, heuristic.rule));
        if let Some(example) = heuristic.examples.good.first() {
            grounding.push_str(&format!("  good example: {example}\n"));
        }
    }
    if let Some(memory) = ctx.memory {
        if let Ok(passages) = memory.retrieve(question, &ctx.question_embedding, 3).await {
            for passage in passages {
                grounding.push_str(&format!("- passage ({}): {}\n", passage.source, passage.content));
            }
        }
    }
    grounding
}

/// `GroundedDebate` (spec §4.5): thesis, antithesis from an antagonist
/// persona, synthesis via the Lens framework, then heuristic validation.
async fn grounded_debate(question: &str, ctx: &PatternContext<'_>) -> DomainResult<PatternResult> {
    if let Some(result) = episodic_short_circuit(question, ctx).await? {
        return Ok(result);
    }

    let mut calls = 0usize;
    let grounding = build_grounding(question, ctx).await;

    let thesis = model_call(
        ctx,
        TaskCategory::DeepReasoning,
        format!("Question: {question}\n\nGrounding:\n{grounding}\nPropose a thesis answer."),
    )
    .await?;
    calls += 1;

    let antagonist = ctx.lens.antagonist();
    let attack_vectors = antagonist.map(|p| p.attack_vectors.join(", ")).unwrap_or_default();
    let antithesis = model_call(
        ctx,
        TaskCategory::Analysis,
        format!("Thesis: {thesis}\n\nAs a critic probing [{attack_vectors}], write an antithesis that challenges this thesis."),
    )
    .await?;
    calls += 1;

    let framework_note = ctx.lens.framework.clone().unwrap_or_else(|| "plain reconciliation".to_string());
    let synthesis = model_call(
        ctx,
        TaskCategory::DeepReasoning,
        format!("Thesis: {thesis}\n\nAntithesis: {antithesis}\n\nUsing the {framework_note} framework, synthesize a final answer."),
    )
    .await?;
    calls += 1;

    let confidence = run_heuristic_validators(&synthesis, ctx, &mut calls).await?;
    let mut result = PatternResult::new(synthesis, confidence, PatternKind::GroundedDebate, calls);
    finalize(question, ctx, &mut result).await?;
    Ok(result)
}

/// `IterativeRefinement` (spec §4.5): draft → critique (via
/// anti-heuristics) → revise, bounded by `max_attempts`, stopping early
/// once validators pass.
async fn iterative_refinement(question: &str, ctx: &PatternContext<'_>, max_attempts: u32) -> DomainResult<PatternResult> {
    if let Some(result) = episodic_short_circuit(question, ctx).await? {
        return Ok(result);
    }

    let mut calls = 0usize;
    let mut draft = model_call(ctx, TaskCategory::CodeGeneration, format!("Draft an answer to: {question}")).await?;
    calls += 1;

    let anti_rules: Vec<String> = ctx.lens.anti_heuristics.iter().map(|h| h.rule.clone()).collect();
    let mut confidence = run_heuristic_validators(&draft, ctx, &mut calls).await?;

    for attempt in 1..=max_attempts {
        if confidence >= 0.7 {
            break;
        }
        let critique = model_call(
            ctx,
            TaskCategory::Analysis,
            format!(
                "Draft (attempt {attempt}): {draft}\n\nCritique it against these anti-patterns: {}",
                anti_rules.join("; ")
            ),
        )
        .await?;
        calls += 1;

        draft = model_call(ctx, TaskCategory::CodeGeneration, format!("Revise the draft using this critique: {critique}\n\nOriginal: {draft}")).await?;
        calls += 1;
        confidence = run_heuristic_validators(&draft, ctx, &mut calls).await?;
    }

    let mut result = PatternResult::new(draft, confidence, PatternKind::IterativeRefinement, calls);
    finalize(question, ctx, &mut result).await?;
    Ok(result)
}

/// `VotingEnsemble` (spec §4.5): N candidates from distinct personas in
/// parallel, each scored by the Lens's validators; highest score wins,
/// ties broken by ascending persona priority.
async fn voting_ensemble(question: &str, ctx: &PatternContext<'_>) -> DomainResult<PatternResult> {
    if let Some(result) = episodic_short_circuit(question, ctx).await? {
        return Ok(result);
    }

    let personas = ctx.lens.personas_by_priority();
    if personas.is_empty() {
        // No personas configured: fall back to a single unattributed
        // candidate rather than failing the whole pattern.
        let answer = model_call(ctx, TaskCategory::CodeGeneration, question.to_string()).await?;
        let mut calls = 1;
        let confidence = run_heuristic_validators(&answer, ctx, &mut calls).await?;
        let mut result = PatternResult::new(answer, confidence, PatternKind::VotingEnsemble, calls);
        finalize(question, ctx, &mut result).await?;
        return Ok(result);
    }

    let futures = personas.iter().map(|persona| generate_candidate(question, ctx, persona));
    let candidates: Vec<DomainResult<(String, u8, f64)>> = join_all(futures).await;

    let mut calls = candidates.len();
    let mut best: Option<(String, u8, f64)> = None;
    for candidate in candidates {
        let (answer, priority, score) = candidate?;
        calls += 1; // one validator call per candidate, folded into run_heuristic_validators below
        let keep = match &best {
            None => true,
            Some((_, best_priority, best_score)) => {
                score > *best_score || ((score - *best_score).abs() < f64::EPSILON && priority < *best_priority)
            }
        };
        if keep {
            best = Some((answer, priority, score));
        }
    }

    let (answer, _, confidence) = best.expect("at least one persona produced a candidate");
    let mut result = PatternResult::new(answer, confidence, PatternKind::VotingEnsemble, calls);
    finalize(question, ctx, &mut result).await?;
    Ok(result)
}

async fn generate_candidate(question: &str, ctx: &PatternContext<'_>, persona: &Persona) -> DomainResult<(String, u8, f64)> {
    let answer = model_call(
        ctx,
        TaskCategory::CodeGeneration,
        format!("As {} ({}), answer: {question}", persona.name, persona.description),
    )
    .await?;
    let mut dummy_calls = 0usize;
    let score = run_heuristic_validators(&answer, ctx, &mut dummy_calls).await?;
    Ok((answer, persona.priority, score))
}

/// Step (f): run every `heuristic_validators` rule as a graded model
/// call, averaging the parsed confidence. With no validators configured
/// the draft is taken at a neutral-but-passing confidence, since an
/// empty validator set should not artificially depress scores.
async fn run_heuristic_validators(answer: &str, ctx: &PatternContext<'_>, calls: &mut usize) -> DomainResult<f64> {
    if ctx.lens.heuristic_validators.is_empty() {
        return Ok(0.75);
    }
    let mut total = 0.0;
    for validator in &ctx.lens.heuristic_validators {
        let score = grade_validator(answer, validator, ctx).await?;
        *calls += 1;
        total += score;
    }
    Ok(total / ctx.lens.heuristic_validators.len() as f64)
}

async fn grade_validator(answer: &str, validator: &HeuristicValidator, ctx: &PatternContext<'_>) -> DomainResult<f64> {
    let response = model_call(
        ctx,
        TaskCategory::QuickAnalysis,
        format!("Rule: {}\n\nAnswer: {answer}\n\nReply with a single confidence score between 0 and 1.", validator.rule),
    )
    .await?;
    Ok(parse_confidence(&response).unwrap_or(validator.pass_threshold))
}

/// Pull the first floating-point-looking token out of a model's free-text
/// grading response. Real providers are prompted to answer with just a
/// number; this stays lenient about surrounding prose.
fn parse_confidence(text: &str) -> Option<f64> {
    text.split(|c: char| !c.is_ascii_digit() && c != '.')
        .filter(|s| !s.is_empty())
        .find_map(|token| token.parse::<f64>().ok())
        .map(|v| v.clamp(0.0, 1.0))
}

/// Steps (g)/(h): persist the attempt to episodic memory above the
/// store threshold, and record a long-term learning about this
/// pattern's effectiveness above the (higher) learning threshold.
async fn finalize(question: &str, ctx: &PatternContext<'_>, result: &mut PatternResult) -> DomainResult<()> {
    let Some(memory) = ctx.memory else { return Ok(()) };
    if result.confidence > EPISODIC_STORE_THRESHOLD {
        memory
            .add_attempt(
                question,
                result.pattern_used.as_str(),
                result.answer.clone(),
                result.signal() != crate::domain::models::ConfidenceSignal::Uncertain,
                result.confidence,
                ctx.question_embedding.clone(),
            )
            .await?;
    }
    if result.confidence > LEARNING_STORE_THRESHOLD {
        memory
            .store_learning(
                format!("{} reached confidence {:.2} on: {question}", result.pattern_used, result.confidence),
                result.pattern_used.as_str(),
                result.confidence,
            )
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_confidence_extracts_leading_float() {
        assert_eq!(parse_confidence("0.92"), Some(0.92));
        assert_eq!(parse_confidence("confidence: 0.8 out of 1"), Some(0.8));
        assert_eq!(parse_confidence("no numbers here"), None);
    }

    #[test]
    fn parse_confidence_clamps_out_of_range() {
        assert_eq!(parse_confidence("1.5"), Some(1.0));
    }
}
