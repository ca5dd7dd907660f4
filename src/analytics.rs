//! # Aggregator
//!
//! Read-only queries over the pipeline tables. Day boundaries follow the
//! configured report offset; every query answers zero or empty when its
//! backing table has not been created yet.

use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, FromQueryResult, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Select, prelude::DateTimeWithTimeZone, sea_query::Expr,
};
use sea_orm_migration::SchemaManager;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{
    AnalyticsEvent, ChatInteraction, InteractionSample, analytics_event, chat_interaction,
    interaction_sample,
};

const EVENTS_TABLE: &str = "analytics_events";
const CHAT_TABLE: &str = "chat_interactions";
const SAMPLES_TABLE: &str = "interaction_samples";

/// Half-open `[start, end)` time range; a missing bound is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn all_time() -> Self {
        Self {
            start: None,
            end: None,
        }
    }

    /// Everything since `now - lookback`.
    pub fn lookback(now: DateTime<Utc>, lookback: Duration) -> Self {
        Self {
            start: Some(now - lookback),
            end: None,
        }
    }

    /// The calendar day containing `now` in `offset`.
    pub fn today(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self::last_days(now, offset, 1)
    }

    /// The last `days` calendar days, today included.
    pub fn last_days(now: DateTime<Utc>, offset: FixedOffset, days: u32) -> Self {
        let today = local_date(now, offset);
        let first = today - Duration::days(i64::from(days.max(1)) - 1);
        Self::between(
            day_start(first, offset),
            day_start(today + Duration::days(1), offset),
        )
    }

    fn apply<E, C>(&self, select: Select<E>, column: C) -> Select<E>
    where
        E: EntityTrait,
        C: ColumnTrait,
    {
        let mut select = select;
        if let Some(start) = self.start {
            select = select.filter(column.gte(start.fixed_offset()));
        }
        if let Some(end) = self.end {
            select = select.filter(column.lt(end.fixed_offset()));
        }
        select
    }
}

fn local_date(now: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    now.with_timezone(&offset).date_naive()
}

/// UTC instant of local midnight starting `date`.
fn day_start(date: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    (date.and_time(NaiveTime::MIN) - Duration::seconds(i64::from(offset.local_minus_utc())))
        .and_utc()
}

/// Occurrences of one event type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromQueryResult, ToSchema)]
pub struct TypeCount {
    pub event_type: String,
    pub occurrences: i64,
}

/// Occurrences of one event type with its latest timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromQueryResult, ToSchema)]
pub struct RecentTypeActivity {
    pub event_type: String,
    pub occurrences: i64,
    #[schema(value_type = String, format = DateTime)]
    pub last_seen: DateTimeWithTimeZone,
}

/// Sample count for one device class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromQueryResult, ToSchema)]
pub struct DeviceCount {
    pub device_type: String,
    pub samples: i64,
}

/// One day of the daily series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DayBucket {
    /// Local calendar date (ISO 8601)
    pub date: NaiveDate,
    /// Short label such as `Oct 19`
    pub label: String,
    pub count: u64,
}

/// Chronological, zero-filled day buckets; the last bucket is today.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DailySeries {
    pub buckets: Vec<DayBucket>,
}

/// Chart-friendly projection of a [`DailySeries`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ChartData {
    pub labels: Vec<String>,
    pub data: Vec<u64>,
}

impl DailySeries {
    pub fn counts(&self) -> Vec<u64> {
        self.buckets.iter().map(|bucket| bucket.count).collect()
    }

    pub fn chart(&self) -> ChartData {
        ChartData {
            labels: self.buckets.iter().map(|b| b.label.clone()).collect(),
            data: self.counts(),
        }
    }
}

/// Headline numbers for the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Overview {
    pub events_today: u64,
    pub events_last_7_days: u64,
    pub total_events: u64,
    pub unique_visitors_today: u64,
    pub top_event_type: Option<TypeCount>,
    pub chat_messages_today: u64,
}

/// Read-side queries over the pipeline tables.
#[derive(Debug, Clone)]
pub struct Aggregator {
    db: Arc<DatabaseConnection>,
    offset: FixedOffset,
}

impl Aggregator {
    pub fn new(db: Arc<DatabaseConnection>, offset: FixedOffset) -> Self {
        Self { db, offset }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    async fn table_exists(&self, table: &str) -> Result<bool, DbErr> {
        SchemaManager::new(&*self.db).has_table(table).await
    }

    /// Count events inside `window`, optionally restricted to one type.
    pub async fn count_events(
        &self,
        window: TimeWindow,
        event_type: Option<&str>,
    ) -> Result<u64, DbErr> {
        if !self.table_exists(EVENTS_TABLE).await? {
            return Ok(0);
        }

        let mut select = window.apply(AnalyticsEvent::find(), analytics_event::Column::CreatedAt);
        if let Some(event_type) = event_type {
            select = select.filter(analytics_event::Column::EventType.eq(event_type));
        }
        select.count(&*self.db).await
    }

    pub async fn events_today(&self) -> Result<u64, DbErr> {
        self.count_events(TimeWindow::today(Utc::now(), self.offset), None)
            .await
    }

    pub async fn events_last_days(&self, days: u32) -> Result<u64, DbErr> {
        self.count_events(TimeWindow::last_days(Utc::now(), self.offset, days), None)
            .await
    }

    pub async fn total_events(&self) -> Result<u64, DbErr> {
        self.count_events(TimeWindow::all_time(), None).await
    }

    /// Distinct client addresses seen inside `window`.
    pub async fn unique_visitors(&self, window: TimeWindow) -> Result<u64, DbErr> {
        if !self.table_exists(EVENTS_TABLE).await? {
            return Ok(0);
        }

        window
            .apply(AnalyticsEvent::find(), analytics_event::Column::CreatedAt)
            .select_only()
            .column(analytics_event::Column::ActorIp)
            .distinct()
            .count(&*self.db)
            .await
    }

    /// Most frequent event type over all time. Ties resolve in engine order.
    pub async fn top_event_type(&self) -> Result<Option<TypeCount>, DbErr> {
        if !self.table_exists(EVENTS_TABLE).await? {
            return Ok(None);
        }

        AnalyticsEvent::find()
            .select_only()
            .column(analytics_event::Column::EventType)
            .column_as(Expr::col(analytics_event::Column::Id).count(), "occurrences")
            .group_by(analytics_event::Column::EventType)
            .order_by_desc(Expr::col(analytics_event::Column::Id).count())
            .limit(1)
            .into_model::<TypeCount>()
            .one(&*self.db)
            .await
    }

    /// Per-type counts and last occurrence over `window`, busiest first.
    pub async fn recent_event_types(
        &self,
        window: TimeWindow,
        limit: u64,
    ) -> Result<Vec<RecentTypeActivity>, DbErr> {
        if !self.table_exists(EVENTS_TABLE).await? {
            return Ok(Vec::new());
        }

        window
            .apply(AnalyticsEvent::find(), analytics_event::Column::CreatedAt)
            .select_only()
            .column(analytics_event::Column::EventType)
            .column_as(Expr::col(analytics_event::Column::Id).count(), "occurrences")
            .column_as(
                Expr::col(analytics_event::Column::CreatedAt).max(),
                "last_seen",
            )
            .group_by(analytics_event::Column::EventType)
            .order_by_desc(Expr::col(analytics_event::Column::Id).count())
            .limit(limit)
            .into_model::<RecentTypeActivity>()
            .all(&*self.db)
            .await
    }

    /// Exactly `days` buckets ending today.
    pub async fn daily_series(&self, days: u32) -> Result<DailySeries, DbErr> {
        self.daily_series_at(Utc::now(), days).await
    }

    /// Daily series as observed at `now`.
    pub async fn daily_series_at(&self, now: DateTime<Utc>, days: u32) -> Result<DailySeries, DbErr> {
        let today = local_date(now, self.offset);
        let table_exists = self.table_exists(EVENTS_TABLE).await?;

        let mut buckets = Vec::with_capacity(days as usize);
        for back in (0..i64::from(days)).rev() {
            let date = today - Duration::days(back);
            let count = if table_exists {
                let window = TimeWindow::between(
                    day_start(date, self.offset),
                    day_start(date + Duration::days(1), self.offset),
                );
                window
                    .apply(AnalyticsEvent::find(), analytics_event::Column::CreatedAt)
                    .count(&*self.db)
                    .await?
            } else {
                0
            };
            buckets.push(DayBucket {
                date,
                label: date.format("%b %-d").to_string(),
                count,
            });
        }

        Ok(DailySeries { buckets })
    }

    /// Chat exchanges recorded inside `window`.
    pub async fn chat_messages(&self, window: TimeWindow) -> Result<u64, DbErr> {
        if !self.table_exists(CHAT_TABLE).await? {
            return Ok(0);
        }

        window
            .apply(ChatInteraction::find(), chat_interaction::Column::CreatedAt)
            .count(&*self.db)
            .await
    }

    /// Interaction samples per device class inside `window`.
    pub async fn device_breakdown(&self, window: TimeWindow) -> Result<Vec<DeviceCount>, DbErr> {
        if !self.table_exists(SAMPLES_TABLE).await? {
            return Ok(Vec::new());
        }

        window
            .apply(InteractionSample::find(), interaction_sample::Column::CreatedAt)
            .select_only()
            .column(interaction_sample::Column::DeviceType)
            .column_as(Expr::col(interaction_sample::Column::Id).count(), "samples")
            .group_by(interaction_sample::Column::DeviceType)
            .order_by_desc(Expr::col(interaction_sample::Column::Id).count())
            .into_model::<DeviceCount>()
            .all(&*self.db)
            .await
    }

    /// Dashboard headline numbers as observed at `now`.
    pub async fn overview_at(&self, now: DateTime<Utc>) -> Result<Overview, DbErr> {
        let today = TimeWindow::today(now, self.offset);

        Ok(Overview {
            events_today: self.count_events(today, None).await?,
            events_last_7_days: self
                .count_events(TimeWindow::last_days(now, self.offset, 7), None)
                .await?,
            total_events: self.total_events().await?,
            unique_visitors_today: self.unique_visitors(today).await?,
            top_event_type: self.top_event_type().await?,
            chat_messages_today: self.chat_messages(today).await?,
        })
    }

    pub async fn overview(&self) -> Result<Overview, DbErr> {
        self.overview_at(Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn today_window_spans_local_midnight_to_midnight() {
        let now = utc(2026, 10, 19, 15, 30);
        let window = TimeWindow::today(now, FixedOffset::east_opt(0).unwrap());

        assert_eq!(window.start, Some(utc(2026, 10, 19, 0, 0)));
        assert_eq!(window.end, Some(utc(2026, 10, 20, 0, 0)));
    }

    #[test]
    fn today_window_respects_negative_offset() {
        // 02:00 UTC is still the previous evening at UTC-5.
        let now = utc(2026, 10, 19, 2, 0);
        let offset = FixedOffset::west_opt(5 * 3600).unwrap();
        let window = TimeWindow::today(now, offset);

        assert_eq!(window.start, Some(utc(2026, 10, 18, 5, 0)));
        assert_eq!(window.end, Some(utc(2026, 10, 19, 5, 0)));
    }

    #[test]
    fn last_days_includes_today() {
        let now = utc(2026, 10, 19, 12, 0);
        let window = TimeWindow::last_days(now, FixedOffset::east_opt(0).unwrap(), 7);

        assert_eq!(window.start, Some(utc(2026, 10, 13, 0, 0)));
        assert_eq!(window.end, Some(utc(2026, 10, 20, 0, 0)));
    }

    #[test]
    fn lookback_is_open_ended() {
        let now = utc(2026, 10, 19, 12, 0);
        let window = TimeWindow::lookback(now, Duration::hours(24));

        assert_eq!(window.start, Some(utc(2026, 10, 18, 12, 0)));
        assert_eq!(window.end, None);
    }

    #[test]
    fn chart_projection_keeps_order() {
        let series = DailySeries {
            buckets: vec![
                DayBucket {
                    date: NaiveDate::from_ymd_opt(2026, 10, 18).unwrap(),
                    label: "Oct 18".into(),
                    count: 2,
                },
                DayBucket {
                    date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
                    label: "Oct 19".into(),
                    count: 0,
                },
            ],
        };

        let chart = series.chart();
        assert_eq!(chart.labels, vec!["Oct 18", "Oct 19"]);
        assert_eq!(chart.data, vec![2, 0]);
    }
}
