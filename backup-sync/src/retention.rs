//! Tiered retention: decide which backups survive a cleanup pass.
//!
//! Backups younger than `min_age` are always kept. Every other backup is
//! assigned to an hour, day, ISO week, month and year bucket. In each tier
//! the earliest backup of a bucket represents it, and the `limit` most
//! recent buckets keep their representative. The result is the union over
//! all tiers plus the grace window.

use crate::record::BackupRecord;
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Seconds during which a backup is exempt from pruning
    #[serde(default = "default_min_age")]
    pub min_age: u64,

    #[serde(default = "default_limit_hourly")]
    pub limit_hourly: usize,

    #[serde(default = "default_limit_daily")]
    pub limit_daily: usize,

    #[serde(default = "default_limit_weekly")]
    pub limit_weekly: usize,

    #[serde(default = "default_limit_monthly")]
    pub limit_monthly: usize,

    #[serde(default = "default_limit_yearly")]
    pub limit_yearly: usize,
}

fn default_min_age() -> u64 {
    1800
}

fn default_limit_hourly() -> usize {
    10
}

fn default_limit_daily() -> usize {
    10
}

fn default_limit_weekly() -> usize {
    0
}

fn default_limit_monthly() -> usize {
    10
}

fn default_limit_yearly() -> usize {
    10
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            min_age: default_min_age(),
            limit_hourly: default_limit_hourly(),
            limit_daily: default_limit_daily(),
            limit_weekly: default_limit_weekly(),
            limit_monthly: default_limit_monthly(),
            limit_yearly: default_limit_yearly(),
        }
    }
}

/// Retention tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Tier {
    pub const ALL: [Tier; 5] = [
        Tier::Hourly,
        Tier::Daily,
        Tier::Weekly,
        Tier::Monthly,
        Tier::Yearly,
    ];

    fn limit(self, policy: &RetentionPolicy) -> usize {
        match self {
            Tier::Hourly => policy.limit_hourly,
            Tier::Daily => policy.limit_daily,
            Tier::Weekly => policy.limit_weekly,
            Tier::Monthly => policy.limit_monthly,
            Tier::Yearly => policy.limit_yearly,
        }
    }

    /// Start of the period containing `time`, in `time`'s own offset.
    pub fn bucket(self, time: &DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        let offset = *time.offset();
        let local = time.naive_local();
        let date = local.date();

        let start = match self {
            Tier::Hourly => date
                .and_hms_opt(local.hour(), 0, 0)
                .unwrap_or_else(|| date.and_time(NaiveTime::MIN)),
            Tier::Daily => date.and_time(NaiveTime::MIN),
            Tier::Weekly => {
                let monday = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
                monday.and_time(NaiveTime::MIN)
            }
            Tier::Monthly => date.with_day(1).unwrap_or(date).and_time(NaiveTime::MIN),
            Tier::Yearly => date
                .with_day(1)
                .and_then(|d| d.with_month(1))
                .unwrap_or(date)
                .and_time(NaiveTime::MIN),
        };

        // A fixed offset has no gaps, so the local time always maps back.
        start
            .and_local_timezone(offset)
            .single()
            .unwrap_or(*time)
    }
}

/// Compute the set of backups to keep.
///
/// `backups` need not be sorted; they are visited in ascending time order.
pub fn select_keep(
    backups: &[BackupRecord],
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> HashSet<BackupRecord> {
    let mut ordered: Vec<&BackupRecord> = backups.iter().collect();
    ordered.sort();

    let grace = i64::try_from(policy.min_age)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX);
    let mut keep: HashSet<BackupRecord> = HashSet::new();
    let mut buckets: Vec<BTreeMap<DateTime<FixedOffset>, &BackupRecord>> =
        vec![BTreeMap::new(); Tier::ALL.len()];

    for backup in ordered {
        if now.signed_duration_since(backup.timestamp()) < grace {
            keep.insert(backup.clone());
            continue;
        }

        for (tier, group) in Tier::ALL.iter().zip(buckets.iter_mut()) {
            // Earliest backup of the period wins.
            group.entry(tier.bucket(&backup.timestamp())).or_insert(backup);
        }
    }

    for (tier, group) in Tier::ALL.iter().zip(buckets.iter()) {
        let limit = tier.limit(policy);
        keep.extend(group.values().rev().take(limit).map(|b| (*b).clone()));
    }

    keep
}

/// Backups not selected by [`select_keep`], in ascending order.
pub fn select_discard(
    backups: &[BackupRecord],
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> Vec<BackupRecord> {
    let keep = select_keep(backups, policy, now);
    let mut discard: Vec<BackupRecord> = backups
        .iter()
        .filter(|b| !keep.contains(b))
        .cloned()
        .collect();
    discard.sort();
    discard
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn offset() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn record(time: DateTime<FixedOffset>) -> BackupRecord {
        let name = format!("t_{}", crate::record::format_timestamp(&time));
        BackupRecord::new(name.clone(), name, time, true).unwrap()
    }

    fn policy(hourly: usize, daily: usize, weekly: usize, monthly: usize, yearly: usize) -> RetentionPolicy {
        RetentionPolicy {
            min_age: 0,
            limit_hourly: hourly,
            limit_daily: daily,
            limit_weekly: weekly,
            limit_monthly: monthly,
            limit_yearly: yearly,
        }
    }

    fn hourly_history(start: DateTime<FixedOffset>, hours: i64) -> Vec<BackupRecord> {
        (0..hours).map(|h| record(start + Duration::hours(h))).collect()
    }

    #[test]
    fn test_bucket_boundaries() {
        // Thursday
        let t = offset().with_ymd_and_hms(2022, 7, 21, 13, 45, 12).unwrap();

        assert_eq!(Tier::Hourly.bucket(&t), offset().with_ymd_and_hms(2022, 7, 21, 13, 0, 0).unwrap());
        assert_eq!(Tier::Daily.bucket(&t), offset().with_ymd_and_hms(2022, 7, 21, 0, 0, 0).unwrap());
        assert_eq!(Tier::Weekly.bucket(&t), offset().with_ymd_and_hms(2022, 7, 18, 0, 0, 0).unwrap());
        assert_eq!(Tier::Monthly.bucket(&t), offset().with_ymd_and_hms(2022, 7, 1, 0, 0, 0).unwrap());
        assert_eq!(Tier::Yearly.bucket(&t), offset().with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_bucket_uses_record_offset() {
        let kst = FixedOffset::east_opt(9 * 3600).unwrap();
        let t = kst.with_ymd_and_hms(2022, 7, 21, 2, 30, 0).unwrap();
        let day = Tier::Daily.bucket(&t);
        assert_eq!(day, kst.with_ymd_and_hms(2022, 7, 21, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_hourly_limit_keeps_five_most_recent_hours() {
        let start = offset().with_ymd_and_hms(2022, 7, 1, 0, 0, 0).unwrap();
        let backups = hourly_history(start, 48);
        let now = (start + Duration::hours(48)).with_timezone(&Utc);

        let keep = select_keep(&backups, &policy(5, 0, 0, 0, 0), now);

        assert_eq!(keep.len(), 5);
        for b in &backups[43..] {
            assert!(keep.contains(b), "expected {} to be kept", b);
        }
        assert_eq!(select_discard(&backups, &policy(5, 0, 0, 0, 0), now).len(), 43);
    }

    #[test]
    fn test_earliest_backup_represents_its_bucket() {
        let start = offset().with_ymd_and_hms(2022, 7, 1, 10, 5, 0).unwrap();
        let backups = vec![
            record(start),
            record(start + Duration::minutes(20)),
            record(start + Duration::minutes(40)),
        ];
        let now = (start + Duration::days(1)).with_timezone(&Utc);

        let keep = select_keep(&backups, &policy(1, 0, 0, 0, 0), now);

        assert_eq!(keep.len(), 1);
        assert!(keep.contains(&backups[0]));
    }

    #[test]
    fn test_grace_window_overrides_zero_limits() {
        let start = offset().with_ymd_and_hms(2022, 7, 1, 0, 0, 0).unwrap();
        let backups = hourly_history(start, 10);
        // Ages of the last two backups are 30 and 90 minutes.
        let now = (start + Duration::hours(9) + Duration::minutes(30)).with_timezone(&Utc);
        let mut p = policy(0, 0, 0, 0, 0);
        p.min_age = 2 * 3600;

        let keep = select_keep(&backups, &p, now);

        assert_eq!(keep.len(), 2);
        assert!(keep.contains(&backups[8]));
        assert!(keep.contains(&backups[9]));
    }

    #[test]
    fn test_tiers_union_without_duplicates() {
        let start = offset().with_ymd_and_hms(2022, 7, 1, 0, 0, 0).unwrap();
        let backups = hourly_history(start, 72);
        let now = (start + Duration::days(4)).with_timezone(&Utc);

        // Daily keeps the midnight backups of Jul 1..3; hourly keeps the last two hours.
        let keep = select_keep(&backups, &policy(2, 3, 0, 0, 0), now);

        assert_eq!(keep.len(), 5);
        assert!(keep.contains(&backups[0]));
        assert!(keep.contains(&backups[24]));
        assert!(keep.contains(&backups[48]));
        assert!(keep.contains(&backups[70]));
        assert!(keep.contains(&backups[71]));
    }

    #[test]
    fn test_overlapping_tiers_count_once() {
        let t = offset().with_ymd_and_hms(2022, 7, 1, 0, 0, 0).unwrap();
        let backups = vec![record(t)];
        let now = (t + Duration::days(1)).with_timezone(&Utc);

        let keep = select_keep(&backups, &policy(1, 1, 1, 1, 1), now);
        assert_eq!(keep.len(), 1);
    }

    #[test]
    fn test_unsorted_input_is_handled() {
        let start = offset().with_ymd_and_hms(2022, 7, 1, 10, 0, 0).unwrap();
        let later = record(start + Duration::minutes(30));
        let earlier = record(start);
        let now = (start + Duration::days(1)).with_timezone(&Utc);

        let keep = select_keep(&[later, earlier.clone()], &policy(1, 0, 0, 0, 0), now);
        assert!(keep.contains(&earlier));
        assert_eq!(keep.len(), 1);
    }

    #[test]
    fn test_huge_min_age_keeps_everything() {
        let start = offset().with_ymd_and_hms(2022, 7, 1, 0, 0, 0).unwrap();
        let backups = hourly_history(start, 24);
        let mut p = policy(0, 0, 0, 0, 0);
        p.min_age = 100_000_000_000_000_000;

        let keep = select_keep(&backups, &p, Utc::now());

        assert_eq!(keep.len(), backups.len());
        assert!(select_discard(&backups, &p, Utc::now()).is_empty());
        assert!(select_keep(&[], &p, Utc::now()).is_empty());
    }

    #[test]
    fn test_empty_history() {
        let keep = select_keep(&[], &RetentionPolicy::default(), Utc::now());
        assert!(keep.is_empty());
    }
}
