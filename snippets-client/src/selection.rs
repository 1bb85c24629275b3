//! Snippet selection
//!
//! Eligibility filters run in a fixed order over the catalog, then one
//! weighted draw picks among the survivors. Nothing here mutates its inputs;
//! the result borrows from the catalog slice.

use crate::facts::HostFacts;
use crate::model::{BlockId, Snippet};
use rand::Rng;
use std::collections::HashSet;
use tracing::debug;

/// Stand-in weight for snippets declaring zero or negative weight
const MIN_WEIGHT: f64 = f64::EPSILON;

/// Inputs besides the catalog
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    pub facts: &'a HostFacts,
    /// Viewport width in pixels
    pub screen_width: u32,
    /// `None` leaves relative version bounds unchecked
    pub current_release: Option<u32>,
    pub blocked: &'a HashSet<BlockId>,
}

/// Snippets passing every eligibility filter, in catalog order
pub fn eligible<'a>(snippets: &'a [Snippet], ctx: &SelectionContext<'_>) -> Vec<&'a Snippet> {
    let facts = ctx.facts;
    let survivors: Vec<&Snippet> = snippets
        .iter()
        .filter(|s| admits_country(s, facts.country.as_deref()))
        .filter(|s| {
            let options = &s.client_options;
            options.account_required.admits(facts.account_configured)
                && options.test_cohort.admits(facts.test_cohort)
                && options.default_browser.admits(facts.default_browser)
        })
        .filter(|s| admits_search_engine(s, facts.selected_search_engine.as_deref()))
        .filter(|s| admits_version(s, facts.application_version, ctx.current_release))
        .filter(|s| s.client_options.screen_resolutions.admits(ctx.screen_width))
        .filter(|s| admits_profile_age(s, facts.profile_age_weeks))
        .filter(|s| !ctx.blocked.contains(&s.block_id()))
        .collect();

    debug!(
        catalog = snippets.len(),
        eligible = survivors.len(),
        "Eligibility filters applied"
    );
    survivors
}

fn admits_country(snippet: &Snippet, country: Option<&str>) -> bool {
    if snippet.countries.is_empty() {
        return true;
    }
    match country {
        Some(country) => snippet.countries.iter().any(|c| c == country),
        None => false,
    }
}

fn admits_search_engine(snippet: &Snippet, engine: Option<&str>) -> bool {
    match engine {
        Some(engine) => !snippet.exclude_from_search_engines.iter().any(|e| e == engine),
        None => true,
    }
}

fn admits_version(snippet: &Snippet, version: Option<u32>, current_release: Option<u32>) -> bool {
    let Some(version) = version else {
        return true;
    };
    let options = &snippet.client_options;
    options.version_lower_bound.admits_lower(version, current_release)
        && options.version_upper_bound.admits_upper(version, current_release)
}

fn admits_profile_age(snippet: &Snippet, age_weeks: Option<u32>) -> bool {
    let options = &snippet.client_options;
    let Some(age) = age_weeks else {
        return !options.declares_profile_age();
    };
    if let Some(lower) = options.profile_age_lower {
        if age < lower {
            return false;
        }
    }
    if let Some(upper) = options.profile_age_upper {
        if age >= upper {
            return false;
        }
    }
    true
}

/// Effective weights: non-positive weights only count when nothing positive remains
fn effective_weights(candidates: &[&Snippet]) -> Vec<f64> {
    let any_positive = candidates.iter().any(|s| s.weight > 0.0);
    candidates
        .iter()
        .map(|s| {
            if s.weight > 0.0 {
                s.weight
            } else if any_positive {
                0.0
            } else {
                MIN_WEIGHT
            }
        })
        .collect()
}

/// Sum of effective weights
pub fn total_weight(candidates: &[&Snippet]) -> f64 {
    effective_weights(candidates).iter().sum()
}

/// Pick the first candidate whose running weight sum exceeds `draw`
///
/// `draw` is expected in `[0, total_weight)`; a draw at or past the total
/// falls back to the last candidate that can win.
pub fn choose_by_draw<'a>(candidates: &[&'a Snippet], draw: f64) -> Option<&'a Snippet> {
    let weights = effective_weights(candidates);
    let mut cumulative = 0.0_f64;
    for (snippet, weight) in candidates.iter().zip(&weights) {
        cumulative += *weight;
        if draw < cumulative {
            return Some(*snippet);
        }
    }
    candidates
        .iter()
        .zip(&weights)
        .rev()
        .find(|(_, w)| **w > 0.0)
        .map(|(s, _)| *s)
}

/// Filter then draw; `None` when nothing is eligible
pub fn select<'a, R: Rng + ?Sized>(
    snippets: &'a [Snippet],
    ctx: &SelectionContext<'_>,
    rng: &mut R,
) -> Option<&'a Snippet> {
    let candidates = eligible(snippets, ctx);
    if candidates.is_empty() {
        return None;
    }
    let draw = rng.gen::<f64>() * total_weight(&candidates);
    let chosen = choose_by_draw(&candidates, draw);
    if let Some(snippet) = chosen {
        debug!(snippet_id = snippet.id, draw = draw, "Snippet selected");
    }
    chosen
}

/// Diagnostic selection: the first catalog entry, unfiltered
pub fn select_preview(snippets: &[Snippet]) -> Option<&Snippet> {
    snippets.first()
}
