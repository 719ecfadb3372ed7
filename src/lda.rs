//! Latent Dirichlet Allocation by batch variational Bayes.
//!
//! Documents are sparse weighted term vectors; weights act as fractional
//! counts, so TF-IDF vectors can be fed directly. Each outer iteration runs
//! the per-document E-step against the current topic-term parameters
//! (`lambda`) and then replaces them with `eta + sufficient statistics`.
//!
//! The fit is a bounded batch job: it stops after `max_iterations`, when the
//! time budget runs out, or when the caller cancels through a [`CancelToken`].

use crate::error::TopicError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Sparse document: `(term index, weight)` pairs, term indices unique
pub type SparseVector = Vec<(usize, f64)>;

/// Shared cancellation flag for long-running analysis
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Limits imposed on a model fit by the caller
#[derive(Debug, Clone)]
pub struct TopicBudget {
    /// Outer EM iterations
    pub max_iterations: usize,
    /// Wall-clock limit; a partial model is kept if at least one iteration finished
    pub time_budget: Option<Duration>,
    pub cancel: CancelToken,
}

impl TopicBudget {
    pub fn iterations(max_iterations: usize) -> Self {
        Self {
            max_iterations,
            time_budget: None,
            cancel: CancelToken::new(),
        }
    }
}

/// Model hyper-parameters
#[derive(Debug, Clone)]
pub struct LdaParams {
    pub num_topics: usize,
    /// Document-topic Dirichlet prior
    pub alpha: f64,
    /// Topic-term Dirichlet prior
    pub eta: f64,
    /// Per-document variational iterations
    pub inner_iterations: usize,
    /// Mean absolute change of a document's gamma below which its E-step stops
    pub tolerance: f64,
    pub seed: u64,
}

impl LdaParams {
    /// Symmetric priors `1/K`
    pub fn new(num_topics: usize, seed: u64) -> Self {
        let prior = 1.0 / num_topics.max(1) as f64;
        Self {
            num_topics,
            alpha: prior,
            eta: prior,
            inner_iterations: 50,
            tolerance: 1e-3,
            seed,
        }
    }
}

/// A fitted topic model
#[derive(Debug, Clone)]
pub struct LdaModel {
    /// `K × V` variational topic-term parameters
    lambda: Vec<Vec<f64>>,
    /// `D × K` normalized document-topic distributions
    doc_topics: Vec<Vec<f64>>,
    /// Completed outer iterations
    pub iterations: usize,
    /// True when the time budget cut the fit short
    pub stopped_early: bool,
}

impl LdaModel {
    pub fn num_topics(&self) -> usize {
        self.lambda.len()
    }

    /// Topic distribution of document `doc`
    pub fn document_topics(&self, doc: usize) -> Option<&[f64]> {
        self.doc_topics.get(doc).map(Vec::as_slice)
    }

    /// Most probable topic of document `doc` and its probability
    pub fn dominant_topic(&self, doc: usize) -> Option<(usize, f64)> {
        self.doc_topics.get(doc)?.iter().copied().enumerate().fold(
            None,
            |best: Option<(usize, f64)>, (t, p)| match best {
                Some((_, bp)) if bp >= p => best,
                _ => Some((t, p)),
            },
        )
    }

    /// The `m` heaviest terms of `topic` as `(term index, normalized weight)`,
    /// descending; ties broken by term index.
    pub fn top_terms(&self, topic: usize, m: usize) -> Vec<(usize, f64)> {
        let Some(row) = self.lambda.get(topic) else {
            return Vec::new();
        };
        let total: f64 = row.iter().sum();
        let mut terms: Vec<(usize, f64)> = row
            .iter()
            .enumerate()
            .map(|(v, w)| (v, if total > 0.0 { w / total } else { 0.0 }))
            .collect();
        terms.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        terms.truncate(m);
        terms
    }
}

/// Fit an LDA model on `docs` over a vocabulary of `vocab_size` terms.
///
/// # Errors
///
/// * `Cancelled` when the token fires at any point
/// * `BudgetExhausted` when the time budget expires before the first iteration completes
/// * `EmptyVocabulary` / `DegenerateWeights` for inputs with nothing to model
pub fn fit(
    docs: &[SparseVector],
    vocab_size: usize,
    params: &LdaParams,
    budget: &TopicBudget,
) -> Result<LdaModel, TopicError> {
    let started = Instant::now();
    fit_until(docs, vocab_size, params, budget, |_| {
        budget.time_budget.is_some_and(|limit| started.elapsed() >= limit)
    })
}

/// Like [`fit`], with the time budget replaced by `should_stop`, which is
/// asked before each document with the number of complete iterations so far.
///
/// Stopping before the first iteration completes is `BudgetExhausted`; later
/// the last complete iteration is kept and the model is flagged `stopped_early`.
pub fn fit_until(
    docs: &[SparseVector],
    vocab_size: usize,
    params: &LdaParams,
    budget: &TopicBudget,
    mut should_stop: impl FnMut(usize) -> bool,
) -> Result<LdaModel, TopicError> {
    if vocab_size == 0 {
        return Err(TopicError::EmptyVocabulary);
    }
    if docs.iter().all(|d| d.iter().all(|(_, w)| *w <= 0.0)) {
        return Err(TopicError::DegenerateWeights);
    }

    let k = params.num_topics.max(1);
    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut lambda: Vec<Vec<f64>> = (0..k)
        .map(|_| (0..vocab_size).map(|_| rng.gen_range(0.5..1.5)).collect())
        .collect();
    let mut gammas: Vec<Vec<f64>> = vec![vec![1.0; k]; docs.len()];

    let started = Instant::now();
    let mut completed = 0usize;
    let mut stopped_early = false;

    info!(
        docs = docs.len(),
        vocab = vocab_size,
        topics = k,
        max_iterations = budget.max_iterations,
        "Fitting topic model"
    );

    'outer: for iteration in 0..budget.max_iterations {
        let exp_elog_beta = exp_expected_log_beta(&lambda);
        let mut sstats = vec![vec![0.0; vocab_size]; k];
        let mut next_gammas = Vec::with_capacity(docs.len());

        for doc in docs {
            if budget.cancel.is_cancelled() {
                warn!(iteration, "Topic model cancelled");
                return Err(TopicError::Cancelled);
            }
            if should_stop(completed) {
                if completed == 0 {
                    return Err(TopicError::BudgetExhausted);
                }
                warn!(completed, "Topic model time budget reached, keeping last complete iteration");
                stopped_early = true;
                break 'outer;
            }
            next_gammas.push(infer_document(doc, &exp_elog_beta, params, &mut sstats));
        }

        for (row, stats) in lambda.iter_mut().zip(&sstats) {
            for (value, s) in row.iter_mut().zip(stats) {
                *value = params.eta + s;
            }
        }
        gammas = next_gammas;
        completed += 1;
        debug!(iteration = completed, elapsed_ms = started.elapsed().as_millis() as u64, "LDA iteration done");
    }

    let doc_topics = gammas
        .into_iter()
        .map(|g| {
            let total: f64 = g.iter().sum();
            g.into_iter().map(|x| x / total).collect()
        })
        .collect();

    Ok(LdaModel {
        lambda,
        doc_topics,
        iterations: completed,
        stopped_early,
    })
}

/// Variational E-step for one document. Adds its expected counts to `sstats`
/// and returns its gamma.
fn infer_document(
    doc: &SparseVector,
    exp_elog_beta: &[Vec<f64>],
    params: &LdaParams,
    sstats: &mut [Vec<f64>],
) -> Vec<f64> {
    let k = exp_elog_beta.len();
    let total: f64 = doc.iter().map(|(_, w)| w).sum();
    let mut gamma = vec![params.alpha + total / k as f64; k];
    let mut exp_elog_theta = vec![0.0; k];
    let mut norms = vec![0.0; doc.len()];

    for _ in 0..params.inner_iterations {
        exp_expected_log_dirichlet(&gamma, &mut exp_elog_theta);
        phi_norms(doc, &exp_elog_theta, exp_elog_beta, &mut norms);

        let mut change = 0.0;
        for (t, g) in gamma.iter_mut().enumerate() {
            let s: f64 = doc
                .iter()
                .zip(&norms)
                .map(|((term, w), n)| w * exp_elog_beta[t][*term] / n)
                .sum();
            let updated = params.alpha + exp_elog_theta[t] * s;
            change += (updated - *g).abs();
            *g = updated;
        }
        if change / (k as f64) < params.tolerance {
            break;
        }
    }

    exp_expected_log_dirichlet(&gamma, &mut exp_elog_theta);
    phi_norms(doc, &exp_elog_theta, exp_elog_beta, &mut norms);
    for ((term, w), n) in doc.iter().zip(&norms) {
        for (t, stats) in sstats.iter_mut().enumerate() {
            stats[*term] += w * exp_elog_theta[t] * exp_elog_beta[t][*term] / n;
        }
    }

    gamma
}

fn phi_norms(doc: &SparseVector, exp_elog_theta: &[f64], exp_elog_beta: &[Vec<f64>], norms: &mut [f64]) {
    for ((term, _), n) in doc.iter().zip(norms.iter_mut()) {
        *n = exp_elog_theta
            .iter()
            .zip(exp_elog_beta)
            .map(|(theta, beta)| theta * beta[*term])
            .sum::<f64>()
            + 1e-100;
    }
}

/// `exp(E[log beta])` for every topic row of `lambda`
fn exp_expected_log_beta(lambda: &[Vec<f64>]) -> Vec<Vec<f64>> {
    lambda
        .iter()
        .map(|row| {
            let mut out = vec![0.0; row.len()];
            exp_expected_log_dirichlet(row, &mut out);
            out
        })
        .collect()
}

/// `exp(digamma(x_i) - digamma(sum x))`
fn exp_expected_log_dirichlet(params: &[f64], out: &mut [f64]) {
    let psi_total = digamma(params.iter().sum());
    for (o, x) in out.iter_mut().zip(params) {
        *o = (digamma(*x) - psi_total).exp();
    }
}

/// Digamma function via recurrence and the asymptotic series; accurate to ~1e-12 for x > 0
pub(crate) fn digamma(mut x: f64) -> f64 {
    let mut result = 0.0;
    while x < 6.0 {
        result -= 1.0 / x;
        x += 1.0;
    }
    let f = 1.0 / (x * x);
    result + x.ln()
        - 0.5 / x
        - f * (1.0 / 12.0 - f * (1.0 / 120.0 - f * (1.0 / 252.0 - f * (1.0 / 240.0 - f / 132.0))))
}

#[cfg(test)]
mod tests {
    use super::*;

    const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

    /// Two obvious clusters over a 6-term vocabulary: terms 0-2 and terms 3-5
    fn clustered_docs() -> Vec<SparseVector> {
        let mut docs = Vec::new();
        for i in 0..10 {
            let bump = (i % 3) as f64 * 0.5;
            docs.push(vec![(0, 3.0 + bump), (1, 2.0), (2, 2.5)]);
            docs.push(vec![(3, 3.0), (4, 2.0 + bump), (5, 2.5)]);
        }
        docs
    }

    #[test]
    fn test_digamma_known_values() {
        assert!((digamma(1.0) + EULER_GAMMA).abs() < 1e-10);
        assert!((digamma(0.5) + EULER_GAMMA + 2.0 * 2f64.ln()).abs() < 1e-10);
        assert!((digamma(10.0) - 2.251_752_589_066_721).abs() < 1e-10);
    }

    #[test]
    fn test_fit_separates_clusters() -> Result<(), TopicError> {
        let docs = clustered_docs();
        let model = fit(&docs, 6, &LdaParams::new(2, 3), &TopicBudget::iterations(30))?;

        assert_eq!(model.num_topics(), 2);
        assert_eq!(model.iterations, 30);
        let (a, _) = model.dominant_topic(0).ok_or(TopicError::NoValidText)?;
        let (b, _) = model.dominant_topic(1).ok_or(TopicError::NoValidText)?;
        assert_ne!(a, b);

        // Every document of a cluster lands on the same topic
        for d in (0..docs.len()).step_by(2) {
            assert_eq!(model.dominant_topic(d).map(|x| x.0), Some(a));
            assert_eq!(model.dominant_topic(d + 1).map(|x| x.0), Some(b));
        }

        let top: Vec<usize> = model.top_terms(a, 3).into_iter().map(|(t, _)| t).collect();
        assert!(top.iter().all(|t| *t < 3));
        Ok(())
    }

    #[test]
    fn test_doc_topics_are_distributions() -> Result<(), TopicError> {
        let model = fit(&clustered_docs(), 6, &LdaParams::new(3, 1), &TopicBudget::iterations(5))?;
        for d in 0..20 {
            let dist = model.document_topics(d).ok_or(TopicError::NoValidText)?;
            assert_eq!(dist.len(), 3);
            assert!((dist.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
        Ok(())
    }

    #[test]
    fn test_fit_is_deterministic_for_seed() -> Result<(), TopicError> {
        let docs = clustered_docs();
        let a = fit(&docs, 6, &LdaParams::new(2, 11), &TopicBudget::iterations(5))?;
        let b = fit(&docs, 6, &LdaParams::new(2, 11), &TopicBudget::iterations(5))?;
        assert_eq!(a.top_terms(0, 6), b.top_terms(0, 6));
        assert_eq!(a.document_topics(4), b.document_topics(4));
        Ok(())
    }

    #[test]
    fn test_cancelled_fit_produces_nothing() {
        let budget = TopicBudget::iterations(10);
        budget.cancel.cancel();
        let result = fit(&clustered_docs(), 6, &LdaParams::new(2, 1), &budget);
        assert_eq!(result.err(), Some(TopicError::Cancelled));
    }

    #[test]
    fn test_zero_time_budget_exhausts() {
        let budget = TopicBudget {
            time_budget: Some(Duration::ZERO),
            ..TopicBudget::iterations(10)
        };
        let result = fit(&clustered_docs(), 6, &LdaParams::new(2, 1), &budget);
        assert_eq!(result.err(), Some(TopicError::BudgetExhausted));
    }

    #[test]
    fn test_stop_after_first_iteration_keeps_it() -> Result<(), TopicError> {
        let docs = clustered_docs();
        let model = fit_until(
            &docs,
            6,
            &LdaParams::new(2, 5),
            &TopicBudget::iterations(10),
            |completed| completed >= 1,
        )?;

        assert_eq!(model.iterations, 1);
        assert!(model.stopped_early);
        for d in 0..docs.len() {
            let dist = model.document_topics(d).ok_or(TopicError::NoValidText)?;
            assert!(dist.iter().all(|p| *p >= 0.0));
            assert!((dist.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
        Ok(())
    }

    #[test]
    fn test_stop_before_first_iteration_exhausts() {
        let result = fit_until(
            &clustered_docs(),
            6,
            &LdaParams::new(2, 5),
            &TopicBudget::iterations(10),
            |_| true,
        );
        assert_eq!(result.err(), Some(TopicError::BudgetExhausted));
    }

    #[test]
    fn test_degenerate_inputs() {
        let budget = TopicBudget::iterations(3);
        let zero = vec![vec![(0, 0.0), (1, 0.0)]];
        assert_eq!(
            fit(&zero, 2, &LdaParams::new(2, 1), &budget).err(),
            Some(TopicError::DegenerateWeights)
        );
        assert_eq!(
            fit(&[], 0, &LdaParams::new(2, 1), &budget).err(),
            Some(TopicError::EmptyVocabulary)
        );
    }
}
