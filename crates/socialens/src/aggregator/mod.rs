//! Read-only analytics over persisted Posts.
//!
//! The same snapshot and query always give the same summary: every
//! histogram is a sorted map, Posts are read in (timestamp, id) order, and
//! ranking ties go to the term seen first in that order.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Days, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use serde::Serialize;

use crate::config::AggregatorConfig;
use crate::error::StoreError;
use crate::model::{EnrichmentState, MediaKind, Platform, Post, PostId, Sentiment, UploadId};
use crate::store::{PostFilter, PostStore};

/// Posts read per store query.
const PAGE_SIZE: u64 = 500;

/// Date range and filters shared by aggregation and export.
///
/// Dates are calendar days in `utc_offset`; both ends are inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateQuery {
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub utc_offset: FixedOffset,
    pub platform: Option<Platform>,
    pub sentiment: Option<Sentiment>,
    pub language: Option<String>,
    pub has_media: Option<bool>,
    pub upload_id: Option<UploadId>,
    pub search_text: Option<String>,
}

impl Default for AggregateQuery {
    fn default() -> Self {
        Self {
            date_from: None,
            date_to: None,
            utc_offset: utc(),
            platform: None,
            sentiment: None,
            language: None,
            has_media: None,
            upload_id: None,
            search_text: None,
        }
    }
}

fn utc() -> FixedOffset {
    Utc.fix()
}

impl AggregateQuery {
    pub fn between(date_from: Option<NaiveDate>, date_to: Option<NaiveDate>) -> Self {
        Self {
            date_from,
            date_to,
            ..Self::default()
        }
    }

    pub fn with_offset(mut self, utc_offset: FixedOffset) -> Self {
        self.utc_offset = utc_offset;
        self
    }

    fn start_of(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        self.utc_offset
            .from_local_datetime(&date.and_time(NaiveTime::MIN))
            .single()
            .map(|local| local.with_timezone(&Utc))
    }

    /// Restricts the range to the `days` calendar days ending on the day
    /// `now` falls on in `utc_offset`. Zero days selects nothing.
    pub fn last_days(mut self, days: u32, now: DateTime<Utc>) -> Self {
        let today = now.with_timezone(&self.utc_offset).date_naive();
        let back = Days::new(u64::from(days.saturating_sub(1)));
        self.date_from = Some(today.checked_sub_days(back).unwrap_or(NaiveDate::MIN));
        self.date_to = if days == 0 { today.pred_opt() } else { Some(today) };
        self
    }

    /// The store filter: `date_to` becomes an exclusive bound at the start
    /// of the following day. Posts mid-attempt (`cleaning`) are left out
    /// until their attempt settles.
    pub fn to_filter(&self) -> PostFilter {
        PostFilter {
            platform: self.platform,
            sentiment: self.sentiment,
            language: self.language.clone(),
            has_media: self.has_media,
            upload_id: self.upload_id.clone(),
            timestamp_from: self.date_from.and_then(|d| self.start_of(d)),
            timestamp_before: self
                .date_to
                .and_then(|d| d.succ_opt())
                .and_then(|d| self.start_of(d)),
            search_text: self.search_text.clone(),
            states: vec![
                EnrichmentState::Raw,
                EnrichmentState::Enriched,
                EnrichmentState::EnrichmentFailed,
            ],
            ..PostFilter::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedTerm {
    pub term: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalyticsSummary {
    pub total_posts: u64,
    pub platforms: BTreeMap<Platform, u64>,
    /// Posts with a sentiment only.
    pub sentiments: BTreeMap<Sentiment, u64>,
    pub languages: BTreeMap<String, u64>,
    /// Counted per media reference.
    pub media_types: BTreeMap<MediaKind, u64>,
    pub top_entities: Vec<RankedTerm>,
    pub top_tags: Vec<RankedTerm>,
    /// Ascending by date, in the query's offset.
    pub daily_posts: Vec<DailyCount>,
}

/// Sentiment counts for one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SentimentDay {
    pub date: NaiveDate,
    pub positive: u64,
    pub negative: u64,
    pub neutral: u64,
}

impl SentimentDay {
    fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            positive: 0,
            negative: 0,
            neutral: 0,
        }
    }

    fn count(&mut self, sentiment: Sentiment) {
        match sentiment {
            Sentiment::Positive => self.positive += 1,
            Sentiment::Negative => self.negative += 1,
            Sentiment::Neutral => self.neutral += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SentimentTrends {
    /// Ascending by date. Days without a classified Post are absent.
    pub days: Vec<SentimentDay>,
}

/// A Post carrying media, as listed by [`Aggregator::popular_content`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaPost {
    pub id: PostId,
    pub platform: Platform,
    pub raw_text: String,
    pub media_count: usize,
    pub sentiment: Option<Sentiment>,
}

impl From<&Post> for MediaPost {
    fn from(post: &Post) -> Self {
        Self {
            id: post.id.clone(),
            platform: post.platform,
            raw_text: post.raw_text.clone(),
            media_count: post.media.len(),
            sentiment: post.sentiment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PopularContent {
    /// In (timestamp, id) order.
    pub media_posts: Vec<MediaPost>,
    pub common_entities: Vec<RankedTerm>,
    pub common_tags: Vec<RankedTerm>,
}

/// Frequency table that remembers the order terms first appeared in.
#[derive(Default)]
struct TermCounter {
    /// Lowercased term -> (display form, count, first-seen position).
    terms: HashMap<String, (String, u64, usize)>,
}

impl TermCounter {
    fn add(&mut self, term: &str) {
        let term = term.trim();
        if term.is_empty() {
            return;
        }
        let next = self.terms.len();
        let slot = self
            .terms
            .entry(term.to_lowercase())
            .or_insert_with(|| (term.to_string(), 0, next));
        slot.1 += 1;
    }

    fn top(self, n: usize) -> Vec<RankedTerm> {
        let mut ranked: Vec<_> = self.terms.into_values().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
        ranked
            .into_iter()
            .take(n)
            .map(|(term, count, _)| RankedTerm { term, count })
            .collect()
    }
}

/// Running totals; fed one Post at a time in store order.
struct Accumulator {
    offset: FixedOffset,
    total: u64,
    platforms: BTreeMap<Platform, u64>,
    sentiments: BTreeMap<Sentiment, u64>,
    languages: BTreeMap<String, u64>,
    media_types: BTreeMap<MediaKind, u64>,
    entities: TermCounter,
    tags: TermCounter,
    daily: BTreeMap<NaiveDate, u64>,
}

impl Accumulator {
    fn new(offset: FixedOffset) -> Self {
        Self {
            offset,
            total: 0,
            platforms: BTreeMap::new(),
            sentiments: BTreeMap::new(),
            languages: BTreeMap::new(),
            media_types: BTreeMap::new(),
            entities: TermCounter::default(),
            tags: TermCounter::default(),
            daily: BTreeMap::new(),
        }
    }

    fn add(&mut self, post: &Post) {
        self.total += 1;
        *self.platforms.entry(post.platform).or_default() += 1;
        if let Some(sentiment) = post.sentiment {
            *self.sentiments.entry(sentiment).or_default() += 1;
        }
        if let Some(language) = &post.language {
            *self.languages.entry(language.clone()).or_default() += 1;
        }
        for media in &post.media {
            *self.media_types.entry(media.kind).or_default() += 1;
            for tag in &media.tags {
                self.tags.add(tag);
            }
        }
        for entity in &post.entities {
            self.entities.add(entity);
        }
        let day = post.timestamp.with_timezone(&self.offset).date_naive();
        *self.daily.entry(day).or_default() += 1;
    }

    fn finish(self, config: &AggregatorConfig) -> AnalyticsSummary {
        let mut daily_posts: Vec<DailyCount> = self
            .daily
            .into_iter()
            .map(|(date, count)| DailyCount { date, count })
            .collect();
        if let Some(limit) = config.daily_limit {
            let excess = daily_posts.len().saturating_sub(limit);
            daily_posts.drain(..excess);
        }

        AnalyticsSummary {
            total_posts: self.total,
            platforms: self.platforms,
            sentiments: self.sentiments,
            languages: self.languages,
            media_types: self.media_types,
            top_entities: self.entities.top(config.top_n),
            top_tags: self.tags.top(config.top_n),
            daily_posts,
        }
    }
}

/// Summarizes `posts`, which must already be in (timestamp, id) order.
pub fn summarize(posts: &[Post], offset: FixedOffset, config: &AggregatorConfig) -> AnalyticsSummary {
    let mut acc = Accumulator::new(offset);
    for post in posts {
        acc.add(post);
    }
    acc.finish(config)
}

pub struct Aggregator {
    posts: Arc<dyn PostStore>,
    config: AggregatorConfig,
}

impl Aggregator {
    pub fn new(posts: Arc<dyn PostStore>, config: AggregatorConfig) -> Self {
        Self { posts, config }
    }

    /// Feeds every Post matching `filter` to `visit`, a page at a time.
    fn scan(&self, mut filter: PostFilter, mut visit: impl FnMut(&Post)) -> Result<(), StoreError> {
        filter.limit = Some(PAGE_SIZE);
        let mut offset = 0u64;

        loop {
            filter.offset = Some(offset);
            let page = self.posts.query(&filter)?;
            for post in &page {
                visit(post);
            }
            if (page.len() as u64) < PAGE_SIZE {
                return Ok(());
            }
            offset += PAGE_SIZE;
        }
    }

    pub fn aggregate(&self, query: &AggregateQuery) -> Result<AnalyticsSummary, StoreError> {
        let mut acc = Accumulator::new(query.utc_offset);
        self.scan(query.to_filter(), |post| acc.add(post))?;

        let summary = acc.finish(&self.config);
        log::debug!(
            "Aggregated {} posts over {} days",
            summary.total_posts,
            summary.daily_posts.len()
        );
        Ok(summary)
    }

    /// Positive, negative and neutral counts per day of the query's range.
    pub fn sentiment_trends(&self, query: &AggregateQuery) -> Result<SentimentTrends, StoreError> {
        let mut days: BTreeMap<NaiveDate, SentimentDay> = BTreeMap::new();
        self.scan(query.to_filter(), |post| {
            let Some(sentiment) = post.sentiment else {
                return;
            };
            let date = post.timestamp.with_timezone(&query.utc_offset).date_naive();
            days.entry(date)
                .or_insert_with(|| SentimentDay::empty(date))
                .count(sentiment);
        })?;

        log::debug!("Sentiment trends over {} days", days.len());
        Ok(SentimentTrends {
            days: days.into_values().collect(),
        })
    }

    /// The first `limit` Posts with media, and the `limit` most common
    /// entities and media tags.
    pub fn popular_content(
        &self,
        query: &AggregateQuery,
        limit: usize,
    ) -> Result<PopularContent, StoreError> {
        let mut media_posts = Vec::new();
        let mut entities = TermCounter::default();
        let mut tags = TermCounter::default();

        self.scan(query.to_filter(), |post| {
            for entity in &post.entities {
                entities.add(entity);
            }
            for media in &post.media {
                for tag in &media.tags {
                    tags.add(tag);
                }
            }
            if !post.media.is_empty() && media_posts.len() < limit {
                media_posts.push(MediaPost::from(post));
            }
        })?;

        Ok(PopularContent {
            media_posts,
            common_entities: entities.top(limit),
            common_tags: tags.top(limit),
        })
    }
}
