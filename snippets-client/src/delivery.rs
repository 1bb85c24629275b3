//! Snippet delivery
//!
//! Drives one session on a host surface:
//!
//! ```text
//! Idle -> FactsRequested -> Selected -> Injected -> Tracking
//!                        \-> NoneEligible (default content)
//! ```
//!
//! Fact requests are issued without waiting; selection runs once with
//! whatever facts have landed by then. After injection, clicks inside the
//! tracked region are reported and, where the navigation was intercepted,
//! replayed once the metric completes. Dismissal reloads or hides the surface
//! only after both the block-list write and its metric complete.

use crate::blocklist::BlockList;
use crate::bus::CorrelationBus;
use crate::content;
use crate::facts::{ClientEnvironment, FactRequests, HostFactCache, HostFacts};
use crate::geo::CountryResolver;
use crate::metrics::{MetricsEvent, MetricsReporter};
use crate::model::{BlockId, Snippet};
use crate::selection::{self, SelectionContext};
use rand::rngs::StdRng;
use rand::SeedableRng;
use snippets_common::{BlockAction, ClientConfig, Completion};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Elements carrying this class dismiss the shown snippet
pub const BLOCK_BUTTON_CLASS: &str = "block-snippet-button";
/// Bus action opening the host's account flow
pub const ACTION_SHOW_ACCOUNTS: &str = "showFirefoxAccounts";
pub const METRIC_IMPRESSION: &str = "impression";
pub const METRIC_CLICK: &str = "click";
pub const METRIC_BLOCKED: &str = "snippet-blocked";

const DEFAULT_TRACKED_REGION: &str = "topSection";

/// Operations the embedding page provides
pub trait HostSurface: Send + Sync {
    /// Insert snippet markup into the container
    fn insert_markup(&self, markup: &str);
    /// Re-create a script fragment as a live node
    fn activate_fragment(&self, script: &str);
    /// Nothing eligible: show the host's own content
    fn show_default_content(&self);
    /// Navigate as the intercepted click would have
    fn follow_link(&self, href: &str);
    fn reload(&self);
    fn hide(&self);
}

/// One element on a click path
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementRef {
    /// Stable identity of the node for the life of the page
    pub node_id: u64,
    /// Lowercase tag name
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub href: Option<String>,
    /// `data-metric` attribute
    pub data_metric: Option<String>,
}

impl ElementRef {
    pub fn is_link(&self) -> bool {
        self.tag.eq_ignore_ascii_case("a")
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }
}

/// Click as seen by the tracked region
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClickEvent {
    /// Target first, then its ancestors outward
    pub path: Vec<ElementRef>,
    /// 0 = primary
    pub button: u16,
    /// Meta or ctrl held (open elsewhere)
    pub modifier: bool,
}

impl ClickEvent {
    pub fn primary(path: Vec<ElementRef>) -> Self {
        Self {
            path,
            button: 0,
            modifier: false,
        }
    }

    fn is_plain_primary(&self) -> bool {
        self.button == 0 && !self.modifier
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Idle,
    FactsRequested,
    Selected,
    NoneEligible,
    Injected,
    Tracking,
}

/// Result of [`DeliveryController::deliver`]
#[must_use]
pub enum DeliveryOutcome {
    Shown {
        snippet_id: i64,
        block_id: BlockId,
        impression: Completion,
    },
    DefaultContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
    /// Not a tracked click (outside any link, or nothing shown)
    Ignored,
    /// Link already reported once; default action proceeds untouched
    AlreadyCounted,
    Tracked,
    Blocked,
}

/// What the surface should do with the click, plus the pending follow-up
#[must_use]
pub struct ClickResponse {
    pub outcome: ClickOutcome,
    /// Suppress the browser's default action
    pub prevent_default: bool,
    /// Fires once the continuation (replay, account flow, reload) has run
    pub followup: Completion,
}

impl ClickResponse {
    fn passthrough(outcome: ClickOutcome) -> Self {
        Self {
            outcome,
            prevent_default: false,
            followup: Completion::ready(),
        }
    }
}

/// Delivery behavior taken from configuration
#[derive(Debug, Clone)]
pub struct DeliverySettings {
    pub preview: bool,
    pub current_release: Option<u32>,
    pub version_token: String,
    pub block_action: BlockAction,
    pub accounts_link_prefix: String,
    pub sample_rate: f64,
    /// Element id bounding click tracking
    pub tracked_region_id: String,
    pub seed: Option<u64>,
}

impl From<&ClientConfig> for DeliverySettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            preview: config.preview,
            current_release: config.current_release,
            version_token: config.version_token.clone(),
            block_action: config.block_action,
            accounts_link_prefix: config.accounts_link_prefix.clone(),
            sample_rate: config.metrics_sample_rate,
            tracked_region_id: DEFAULT_TRACKED_REGION.to_string(),
            seed: config.random_seed,
        }
    }
}

enum Continuation {
    None,
    FollowLink(String),
    ShowAccounts,
}

pub struct DeliveryController {
    settings: DeliverySettings,
    environment: ClientEnvironment,
    bus: CorrelationBus,
    facts: HostFactCache,
    country: Option<CountryResolver>,
    block_list: BlockList,
    metrics: Arc<MetricsReporter>,
    surface: Arc<dyn HostSurface>,
    rng: StdRng,
    state: DeliveryState,
    shown: Option<Snippet>,
    counted: HashSet<u64>,
}

impl DeliveryController {
    pub fn new(
        settings: DeliverySettings,
        environment: ClientEnvironment,
        bus: CorrelationBus,
        block_list: BlockList,
        metrics: Arc<MetricsReporter>,
        surface: Arc<dyn HostSurface>,
    ) -> Self {
        let facts = HostFactCache::new(HostFacts::from_environment(
            &environment,
            &settings.version_token,
        ));
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            settings,
            environment,
            bus,
            facts,
            country: None,
            block_list,
            metrics,
            surface,
            rng,
            state: DeliveryState::Idle,
            shown: None,
            counted: HashSet::new(),
        }
    }

    /// Enable the country lookup
    pub fn with_country_resolver(mut self, resolver: CountryResolver) -> Self {
        self.country = Some(resolver);
        self
    }

    pub fn state(&self) -> DeliveryState {
        self.state
    }

    pub fn facts(&self) -> &HostFactCache {
        &self.facts
    }

    /// Snippet currently on the surface
    pub fn shown(&self) -> Option<&Snippet> {
        self.shown.as_ref()
    }

    /// Ask the host (and geolocation) for facts; only the first call has effect
    pub async fn request_facts(&mut self) -> Option<FactRequests> {
        if self.state != DeliveryState::Idle {
            return None;
        }
        let requests = self.facts.start(&self.bus);
        let geo = match &self.country {
            Some(resolver) => resolver.resolve(&self.facts).await,
            None => None,
        };
        self.state = DeliveryState::FactsRequested;
        Some(requests.with_task(geo))
    }

    /// Select and show a snippet, or fall back to default content
    pub async fn deliver(&mut self, catalog: &[Snippet]) -> DeliveryOutcome {
        // Pending answers keep filling the cache in the background
        let _ = self.request_facts().await;
        let facts = self.facts.snapshot().await;

        let chosen = if self.settings.preview {
            selection::select_preview(catalog)
        } else {
            let blocked = self.block_list.id_set();
            let ctx = SelectionContext {
                facts: &facts,
                screen_width: self.environment.screen_width,
                current_release: self.settings.current_release,
                blocked: &blocked,
            };
            selection::select(catalog, &ctx, &mut self.rng)
        };

        let Some(snippet) = chosen.cloned() else {
            info!(catalog = catalog.len(), "No eligible snippet; showing default content");
            self.state = DeliveryState::NoneEligible;
            self.surface.show_default_content();
            return DeliveryOutcome::DefaultContent;
        };
        self.state = DeliveryState::Selected;
        info!(snippet_id = snippet.id, name = %snippet.name, "Showing snippet");

        let params = content::link_parameters(self.settings.sample_rate, snippet.id);
        let prepared = content::prepare(&snippet.content, &params);
        self.surface.insert_markup(&prepared.markup);
        for script in &prepared.scripts {
            self.surface.activate_fragment(script);
        }
        self.state = DeliveryState::Injected;

        let snippet_id = snippet.id;
        let block_id = snippet.block_id();
        self.counted.clear();
        self.shown = Some(snippet);
        self.state = DeliveryState::Tracking;

        let impression = self.report(METRIC_IMPRESSION, None, &facts);
        DeliveryOutcome::Shown {
            snippet_id,
            block_id,
            impression,
        }
    }

    /// Handle a click bubbling through the tracked region
    pub async fn handle_click(&mut self, event: &ClickEvent) -> ClickResponse {
        if self.state != DeliveryState::Tracking {
            return ClickResponse::passthrough(ClickOutcome::Ignored);
        }
        let region = self.tracked_path(event);

        if region.iter().any(|e| e.has_class(BLOCK_BUTTON_CLASS)) {
            return self.block_shown().await;
        }

        let Some(link) = region.iter().find(|e| e.is_link()).cloned() else {
            return ClickResponse::passthrough(ClickOutcome::Ignored);
        };
        if !self.counted.insert(link.node_id) {
            return ClickResponse::passthrough(ClickOutcome::AlreadyCounted);
        }

        let snippet_id = self.shown.as_ref().map(|s| s.id).unwrap_or_default();
        let mut metric = link
            .data_metric
            .clone()
            .unwrap_or_else(|| METRIC_CLICK.to_string());
        let mut continuation = Continuation::None;
        let mut prevent_default = false;

        if let Some(href) = &link.href {
            if href.starts_with(&self.settings.accounts_link_prefix) {
                metric = link
                    .data_metric
                    .clone()
                    .unwrap_or_else(|| format!("{}-about-accounts-click", snippet_id));
                continuation = Continuation::ShowAccounts;
            } else if event.is_plain_primary() {
                prevent_default = true;
                continuation = Continuation::FollowLink(href.clone());
            }
        }

        debug!(metric = %metric, node_id = link.node_id, "Tracked snippet click");
        let facts = self.facts.snapshot().await;
        let reported = self.report(&metric, link.href.clone(), &facts);

        let surface = Arc::clone(&self.surface);
        let bus = self.bus.clone();
        let (done, followup) = Completion::pair();
        tokio::spawn(async move {
            reported.await;
            match continuation {
                Continuation::FollowLink(href) => surface.follow_link(&href),
                Continuation::ShowAccounts => bus.send(ACTION_SHOW_ACCOUNTS, serde_json::json!({})),
                Continuation::None => {}
            }
            done.complete();
        });

        ClickResponse {
            outcome: ClickOutcome::Tracked,
            prevent_default,
            followup,
        }
    }

    /// Remove an id from the block list
    pub fn unblock(&self, id: &BlockId) -> Completion {
        self.block_list.unblock(id)
    }

    async fn block_shown(&mut self) -> ClickResponse {
        let Some(snippet) = self.shown.as_ref() else {
            return ClickResponse::passthrough(ClickOutcome::Ignored);
        };
        let block_id = snippet.block_id();

        let stored = self.block_list.block(&block_id);
        let facts = self.facts.snapshot().await;
        let reported = self.report(METRIC_BLOCKED, None, &facts);

        let surface = Arc::clone(&self.surface);
        let action = self.settings.block_action;
        let (done, followup) = Completion::pair();
        tokio::spawn(async move {
            Completion::all(vec![stored, reported]).await;
            match action {
                BlockAction::Reload => surface.reload(),
                BlockAction::Hide => surface.hide(),
            }
            done.complete();
        });

        ClickResponse {
            outcome: ClickOutcome::Blocked,
            prevent_default: true,
            followup,
        }
    }

    /// Click path truncated at the tracked region; empty when the click
    /// never reached it
    fn tracked_path<'e>(&self, event: &'e ClickEvent) -> &'e [ElementRef] {
        let region_id = self.settings.tracked_region_id.as_str();
        match event
            .path
            .iter()
            .position(|e| e.id.as_deref() == Some(region_id))
        {
            Some(end) => &event.path[..end],
            None => {
                debug!("Click path does not reach the tracked region");
                &[]
            }
        }
    }

    fn report(&self, metric: &str, href: Option<String>, facts: &HostFacts) -> Completion {
        let Some(snippet) = self.shown.as_ref() else {
            return Completion::next_tick();
        };
        let event = MetricsEvent {
            metric: metric.to_string(),
            snippet_id: snippet.id,
            snippet_full_name: snippet.name.clone(),
            campaign: snippet.campaign.clone(),
            country: facts.country.clone(),
            href,
        };
        self.metrics.report(&event, facts.telemetry_enabled)
    }
}
