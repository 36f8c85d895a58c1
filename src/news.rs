// =============================================================================
// News / Economic Calendar View
// =============================================================================
//
// Periodically refreshed from an external calendar HTTP JSON feed. A single
// background task owns the refresh; every symbol worker reads the latest
// `NewsView` rather than each fetching its own copy.

use chrono::{Duration, Utc};
use parking_lot::RwLock;
use tracing::{debug, instrument, warn};

use crate::domain::{NewsEvent, NewsImpact, NewsView, SentimentCounts};
use crate::error::EngineError;

/// How far ahead of a high-impact event the blackout window opens.
const BLACKOUT_LEAD: Duration = Duration::minutes(15);
/// How long after a high-impact event the blackout window stays open.
const BLACKOUT_TRAIL: Duration = Duration::minutes(15);
/// Polarity magnitude below which an article is counted as neutral.
const NEUTRAL_BAND: f64 = 0.1;

pub struct NewsService {
    feed_url: String,
    sentiment_feed_url: Option<String>,
    client: reqwest::Client,
    view: RwLock<NewsView>,
}

/// A single news article as returned by the sentiment feed, already
/// polarity-scored upstream (this service aggregates, it does not run NLP).
struct Article {
    headline: String,
    polarity: f64,
    symbols: Vec<String>,
}

impl NewsService {
    pub fn new(feed_url: impl Into<String>) -> Self {
        Self {
            feed_url: feed_url.into(),
            sentiment_feed_url: None,
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("failed to build reqwest client"),
            view: RwLock::new(NewsView::default()),
        }
    }

    pub fn with_sentiment_feed(mut self, url: impl Into<String>) -> Self {
        self.sentiment_feed_url = Some(url.into());
        self
    }

    pub fn current(&self) -> NewsView {
        self.view.read().clone()
    }

    /// Fetch the calendar feed (and, if configured, the article sentiment
    /// feed) and rebuild the cached `NewsView`.
    #[instrument(skip(self), name = "news::refresh")]
    pub async fn refresh(&self) -> Result<(), EngineError> {
        let events = self.fetch_calendar().await?;
        let (sentiment_counts, overall_sentiment, polarity_avg, total_analyzed) = match &self.sentiment_feed_url {
            Some(url) => {
                let articles = self.fetch_articles(url).await?;
                aggregate_sentiment(&articles)
            }
            None => (SentimentCounts::default(), 0.0, 0.0, 0),
        };

        let mut view = build_view(events);
        view.sentiment_counts = sentiment_counts;
        view.overall_sentiment = overall_sentiment;
        view.polarity_avg = polarity_avg;
        view.total_analyzed = total_analyzed;

        debug!(
            upcoming = view.upcoming_high_impact.len(),
            blackout = view.blackout_active,
            overall_sentiment,
            total_analyzed,
            "news view refreshed"
        );
        *self.view.write() = view;
        Ok(())
    }

    async fn fetch_calendar(&self) -> Result<Vec<NewsEvent>, EngineError> {
        let resp = self
            .client
            .get(&self.feed_url)
            .send()
            .await
            .map_err(|e| EngineError::NewsFetchFailed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(EngineError::NewsFetchFailed(format!("status {}", resp.status())));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| EngineError::NewsFetchFailed(e.to_string()))?;

        let raw = body
            .as_array()
            .ok_or_else(|| EngineError::NewsFetchFailed("feed response is not an array".to_string()))?;

        let mut events = Vec::new();
        for entry in raw {
            let Some(title) = entry["title"].as_str() else { continue };
            let currency = entry["currency"].as_str().unwrap_or("").to_string();
            let impact = match entry["impact"].as_str() {
                Some("high") | Some("HIGH") => NewsImpact::High,
                Some("medium") | Some("MEDIUM") => NewsImpact::Medium,
                _ => NewsImpact::Low,
            };
            let Some(ts) = entry["time"].as_str().and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            else {
                warn!(title, "skipping news entry with unparseable timestamp");
                continue;
            };
            events.push(NewsEvent {
                title: title.to_string(),
                currency,
                impact,
                scheduled_at: ts.with_timezone(&Utc),
            });
        }
        Ok(events)
    }

    async fn fetch_articles(&self, url: &str) -> Result<Vec<Article>, EngineError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| EngineError::NewsFetchFailed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(EngineError::NewsFetchFailed(format!("status {}", resp.status())));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| EngineError::NewsFetchFailed(e.to_string()))?;

        let raw = body
            .as_array()
            .ok_or_else(|| EngineError::NewsFetchFailed("sentiment feed response is not an array".to_string()))?;

        let mut articles = Vec::new();
        for entry in raw {
            let Some(headline) = entry["headline"].as_str() else { continue };
            let polarity = entry["polarity"].as_f64().unwrap_or(0.0).clamp(-1.0, 1.0);
            let symbols = entry["symbols"]
                .as_array()
                .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_uppercase)).collect())
                .unwrap_or_default();
            articles.push(Article { headline: headline.to_string(), polarity, symbols });
        }
        Ok(articles)
    }
}

/// Keyword-based relevance: an article is relevant to `symbol` if the
/// symbol (or its base currency pair prefix) appears among the article's
/// tagged symbols, case-insensitively.
pub fn articles_relevant_to<'a>(headlines: &'a [(String, Vec<String>)], symbol: &str) -> Vec<&'a str> {
    let symbol_upper = symbol.to_uppercase();
    headlines
        .iter()
        .filter(|(_, symbols)| symbols.iter().any(|s| s == &symbol_upper))
        .map(|(h, _)| h.as_str())
        .collect()
}

fn aggregate_sentiment(articles: &[Article]) -> (SentimentCounts, f64, f64, u32) {
    if articles.is_empty() {
        return (SentimentCounts::default(), 0.0, 0.0, 0);
    }

    let mut counts = SentimentCounts::default();
    let mut sum = 0.0;
    for a in articles {
        sum += a.polarity;
        if a.polarity > NEUTRAL_BAND {
            counts.bullish += 1;
        } else if a.polarity < -NEUTRAL_BAND {
            counts.bearish += 1;
        } else {
            counts.neutral += 1;
        }
        let _ = &a.headline;
    }
    let total = articles.len() as u32;
    let polarity_avg = sum / articles.len() as f64;
    // overallSentiment folds the bullish/bearish split into the same -1..1
    // scale as the raw polarity average, weighting by how decisive the
    // article mix was rather than just the magnitude.
    let decisive = counts.bullish + counts.bearish;
    let overall_sentiment = if decisive == 0 {
        0.0
    } else {
        (counts.bullish as f64 - counts.bearish as f64) / decisive as f64
    };
    (counts, overall_sentiment, polarity_avg, total)
}

fn build_view(mut events: Vec<NewsEvent>) -> NewsView {
    let now = Utc::now();
    events.retain(|e| e.scheduled_at + BLACKOUT_TRAIL > now);
    events.sort_by_key(|e| e.scheduled_at);

    let high_impact: Vec<NewsEvent> = events.into_iter().filter(|e| e.impact == NewsImpact::High).collect();

    let blackout_active = high_impact
        .iter()
        .any(|e| now >= e.scheduled_at - BLACKOUT_LEAD && now <= e.scheduled_at + BLACKOUT_TRAIL);

    NewsView {
        fetched_at: now,
        upcoming_high_impact: high_impact,
        blackout_active,
        overall_sentiment: 0.0,
        polarity_avg: 0.0,
        sentiment_counts: SentimentCounts::default(),
        total_analyzed: 0,
    }
}
