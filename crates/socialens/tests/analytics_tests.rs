//! Aggregation and export over a populated store.

mod common;

use std::sync::Arc;

use chrono::{FixedOffset, NaiveDate};
use serde_json::Value;

use common::builders::{stored_post, utc};
use socialens::config::AggregatorConfig;
use socialens::model::{
    EnrichmentState, MediaKind, MediaRef, Platform, Post, PostId, Sentiment, UploadId,
};
use socialens::{
    AggregateQuery, Aggregator, Database, ExportError, ExportFormat, Exporter, PostStore,
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Six posts over three UTC days with known entities and tags.
fn seeded() -> Arc<Database> {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let upload = UploadId::from_string("upload-a");

    let mut posts: Vec<Post> = vec![
        stored_post(&upload, "1", Platform::Twitter, utc(2026, 3, 1, 10)),
        stored_post(&upload, "2", Platform::Twitter, utc(2026, 3, 1, 23)),
        stored_post(&upload, "3", Platform::Instagram, utc(2026, 3, 2, 8)),
        stored_post(&upload, "4", Platform::Instagram, utc(2026, 3, 2, 9)),
        stored_post(&upload, "5", Platform::Facebook, utc(2026, 3, 3, 12)),
        stored_post(&upload, "6", Platform::Twitter, utc(2026, 3, 3, 13)),
    ];
    posts[0].entities = vec!["Rust".into(), "Berlin".into()];
    posts[1].entities = vec!["berlin".into(), "Tokio".into()];
    posts[2].entities = vec!["Tokio".into(), "Rust".into()];
    posts[3].entities = vec!["Serde".into()];
    posts[0].sentiment = Some(Sentiment::Positive);
    posts[1].sentiment = Some(Sentiment::Positive);
    posts[2].sentiment = Some(Sentiment::Negative);
    posts[4].language = Some("de".into());

    let mut photo = MediaRef::new(MediaKind::Image, "beach.png");
    photo.tags = vec!["beach".into(), "outdoor".into()];
    posts[2].media = vec![photo];
    posts[3].media = vec![MediaRef::new(MediaKind::Video, "clip.mp4")];
    posts[5].raw_text = "Shipping the new release today".into();

    for post in &posts {
        db.upsert_source(post).unwrap();
    }
    db
}

#[test]
fn test_aggregate_counts_everything() {
    let aggregator = Aggregator::new(seeded(), AggregatorConfig::default());
    let summary = aggregator.aggregate(&AggregateQuery::default()).unwrap();

    assert_eq!(summary.total_posts, 6);
    assert_eq!(summary.platforms[&Platform::Twitter], 3);
    assert_eq!(summary.platforms[&Platform::Instagram], 2);
    assert_eq!(summary.platforms[&Platform::Facebook], 1);
    assert_eq!(summary.sentiments[&Sentiment::Positive], 2);
    assert_eq!(summary.sentiments[&Sentiment::Negative], 1);
    assert!(!summary.sentiments.contains_key(&Sentiment::Neutral));
    assert_eq!(summary.languages["en"], 5);
    assert_eq!(summary.languages["de"], 1);
    assert_eq!(summary.media_types[&MediaKind::Image], 1);
    assert_eq!(summary.media_types[&MediaKind::Video], 1);

    let daily: Vec<(NaiveDate, u64)> = summary
        .daily_posts
        .iter()
        .map(|d| (d.date, d.count))
        .collect();
    assert_eq!(
        daily,
        vec![
            (date(2026, 3, 1), 2),
            (date(2026, 3, 2), 2),
            (date(2026, 3, 3), 2)
        ]
    );
}

#[test]
fn test_top_terms_break_ties_by_first_appearance() {
    let aggregator = Aggregator::new(
        seeded(),
        AggregatorConfig {
            top_n: 3,
            daily_limit: None,
        },
    );
    let summary = aggregator.aggregate(&AggregateQuery::default()).unwrap();

    let entities: Vec<(&str, u64)> = summary
        .top_entities
        .iter()
        .map(|t| (t.term.as_str(), t.count))
        .collect();
    assert_eq!(entities, vec![("Rust", 2), ("Berlin", 2), ("Tokio", 2)]);

    let tags: Vec<&str> = summary.top_tags.iter().map(|t| t.term.as_str()).collect();
    assert_eq!(tags, vec!["beach", "outdoor"]);
}

#[test]
fn test_aggregate_is_deterministic() {
    let db = seeded();
    let aggregator = Aggregator::new(db, AggregatorConfig::default());
    let query = AggregateQuery::default();

    let first = aggregator.aggregate(&query).unwrap();
    let second = aggregator.aggregate(&query).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[test]
fn test_date_range_follows_offset() {
    let aggregator = Aggregator::new(seeded(), AggregatorConfig::default());

    let utc_day = aggregator
        .aggregate(&AggregateQuery::between(Some(date(2026, 3, 1)), Some(date(2026, 3, 1))))
        .unwrap();
    assert_eq!(utc_day.total_posts, 2);

    // 23:00 UTC on March 1st is already March 2nd at +02:00.
    let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
    let shifted = aggregator
        .aggregate(
            &AggregateQuery::between(Some(date(2026, 3, 2)), Some(date(2026, 3, 2)))
                .with_offset(plus_two),
        )
        .unwrap();
    assert_eq!(shifted.total_posts, 3);
    assert_eq!(shifted.daily_posts.len(), 1);
    assert_eq!(shifted.daily_posts[0].date, date(2026, 3, 2));
}

#[test]
fn test_filters_narrow_the_summary() {
    let aggregator = Aggregator::new(seeded(), AggregatorConfig::default());

    let query = AggregateQuery {
        platform: Some(Platform::Instagram),
        ..AggregateQuery::default()
    };
    assert_eq!(aggregator.aggregate(&query).unwrap().total_posts, 2);

    let query = AggregateQuery {
        has_media: Some(true),
        ..AggregateQuery::default()
    };
    assert_eq!(aggregator.aggregate(&query).unwrap().total_posts, 2);

    let query = AggregateQuery {
        search_text: Some("RELEASE".into()),
        ..AggregateQuery::default()
    };
    assert_eq!(aggregator.aggregate(&query).unwrap().total_posts, 1);
}

#[test]
fn test_empty_range_gives_empty_summary() {
    let aggregator = Aggregator::new(seeded(), AggregatorConfig::default());
    let summary = aggregator
        .aggregate(&AggregateQuery::between(Some(date(2027, 1, 1)), None))
        .unwrap();
    assert_eq!(summary.total_posts, 0);
    assert!(summary.platforms.is_empty());
    assert!(summary.top_entities.is_empty());
    assert!(summary.daily_posts.is_empty());
}

#[test]
fn test_posts_mid_attempt_are_not_counted() {
    let db = seeded();
    let upload = UploadId::from_string("upload-b");
    let mut waiting = stored_post(&upload, "7", Platform::Youtube, utc(2026, 3, 1, 11));
    waiting.enrichment_state = EnrichmentState::Raw;
    waiting.language = None;
    let mut running = stored_post(&upload, "8", Platform::Youtube, utc(2026, 3, 1, 12));
    running.enrichment_state = EnrichmentState::Cleaning;
    db.upsert_source(&waiting).unwrap();
    db.upsert_source(&running).unwrap();

    let aggregator = Aggregator::new(db, AggregatorConfig::default());
    let summary = aggregator.aggregate(&AggregateQuery::default()).unwrap();
    assert_eq!(summary.total_posts, 7);
    assert_eq!(summary.platforms[&Platform::Youtube], 1);
    assert_eq!(summary.languages["en"], 5);
}

#[test]
fn test_sentiment_trends_per_day() {
    let aggregator = Aggregator::new(seeded(), AggregatorConfig::default());

    let trends = aggregator.sentiment_trends(&AggregateQuery::default()).unwrap();
    let days: Vec<(NaiveDate, u64, u64, u64)> = trends
        .days
        .iter()
        .map(|d| (d.date, d.positive, d.negative, d.neutral))
        .collect();
    assert_eq!(
        days,
        vec![(date(2026, 3, 1), 2, 0, 0), (date(2026, 3, 2), 0, 1, 0)]
    );

    let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
    let shifted = aggregator
        .sentiment_trends(&AggregateQuery::default().with_offset(plus_two))
        .unwrap();
    let days: Vec<(NaiveDate, u64, u64)> = shifted
        .days
        .iter()
        .map(|d| (d.date, d.positive, d.negative))
        .collect();
    assert_eq!(
        days,
        vec![(date(2026, 3, 1), 1, 0), (date(2026, 3, 2), 1, 1)]
    );
}

#[test]
fn test_sentiment_trends_for_last_days() {
    let aggregator = Aggregator::new(seeded(), AggregatorConfig::default());
    let query = AggregateQuery::default().last_days(2, utc(2026, 3, 3, 18));

    let trends = aggregator.sentiment_trends(&query).unwrap();
    assert_eq!(trends.days.len(), 1);
    assert_eq!(trends.days[0].date, date(2026, 3, 2));
    assert_eq!(trends.days[0].negative, 1);

    let none = AggregateQuery::default().last_days(0, utc(2026, 3, 3, 18));
    assert!(aggregator.sentiment_trends(&none).unwrap().days.is_empty());
}

#[test]
fn test_popular_content() {
    let aggregator = Aggregator::new(seeded(), AggregatorConfig::default());

    let content = aggregator
        .popular_content(&AggregateQuery::default(), 10)
        .unwrap();
    let ids: Vec<&PostId> = content.media_posts.iter().map(|p| &p.id).collect();
    assert_eq!(
        ids,
        vec![
            &PostId::derive("instagram", "3"),
            &PostId::derive("instagram", "4")
        ]
    );
    assert_eq!(content.media_posts[0].media_count, 1);
    assert_eq!(content.media_posts[0].sentiment, Some(Sentiment::Negative));
    let tags: Vec<&str> = content.common_tags.iter().map(|t| t.term.as_str()).collect();
    assert_eq!(tags, vec!["beach", "outdoor"]);
    assert_eq!(content.common_entities.len(), 4);

    let top = aggregator
        .popular_content(&AggregateQuery::default(), 1)
        .unwrap();
    assert_eq!(top.media_posts.len(), 1);
    assert_eq!(top.common_entities[0].term, "Rust");
    assert_eq!(top.common_entities[0].count, 2);
    assert_eq!(top.common_tags[0].term, "beach");
}

#[test]
fn test_export_csv_with_selected_fields() {
    let exporter = Exporter::new(seeded());
    let fields = vec!["platform".to_string(), "entities".to_string()];
    let query = AggregateQuery::between(Some(date(2026, 3, 1)), Some(date(2026, 3, 1)));

    let bytes = exporter
        .export(&query, ExportFormat::Csv, Some(&fields))
        .unwrap();
    let text = String::from_utf8(bytes).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "platform,entities");
    assert_eq!(lines[1], "twitter,\"Rust, Berlin\"");
    assert_eq!(lines[2], "twitter,\"berlin, Tokio\"");
    assert_eq!(lines.len(), 3);
}

#[test]
fn test_export_json_uses_default_fields() {
    let exporter = Exporter::new(seeded());
    let bytes = exporter
        .export(&AggregateQuery::default(), ExportFormat::Json, None)
        .unwrap();
    let rows: Vec<Value> = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(rows.len(), 6);
    let first = rows[0].as_object().unwrap();
    assert_eq!(first.len(), 10);
    assert_eq!(first["platform"], "twitter");
    assert_eq!(first["entities"], serde_json::json!(["Rust", "Berlin"]));
    assert_eq!(rows[3]["media_count"], 1);
}

#[test]
fn test_export_rejects_unknown_field() {
    let exporter = Exporter::new(seeded());
    let fields = vec!["platform".to_string(), "password".to_string()];
    let err = exporter
        .export(&AggregateQuery::default(), ExportFormat::Csv, Some(&fields))
        .unwrap_err();
    assert!(matches!(err, ExportError::UnknownField(name) if name == "password"));
}

#[test]
fn test_export_empty_csv_keeps_header() {
    let exporter = Exporter::new(seeded());
    let bytes = exporter
        .export(
            &AggregateQuery::between(Some(date(2030, 1, 1)), None),
            ExportFormat::Csv,
            None,
        )
        .unwrap();
    let text = String::from_utf8(bytes).unwrap();
    assert_eq!(text.lines().count(), 1);
    assert!(text.starts_with("post_id,platform,raw_text"));
}
