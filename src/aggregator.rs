//! Merges live pushed trust with fetched historical series into one coherent
//! view.
//!
//! History is the backbone; live points extend it past the last historical
//! timestamp. A live point wins a timestamp tie (it is assumed fresher). No
//! smoothing or interpolation — consumers see exactly the emitted points.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::types::TrustSnapshot;

pub struct TrustAggregator {
    /// Most recent live push, if any.
    live: Option<TrustSnapshot>,
    /// Live points newer than the last historical point, oldest first.
    live_tail: Vec<TrustSnapshot>,
    /// Historical backbone, oldest first.
    history: Vec<TrustSnapshot>,
    history_capacity: usize,
    freshness_threshold: Duration,
}

impl TrustAggregator {
    pub fn new(history_capacity: usize, freshness_threshold: Duration) -> Self {
        Self {
            live: None,
            live_tail: Vec::new(),
            history: Vec::new(),
            history_capacity: history_capacity.max(1),
            freshness_threshold,
        }
    }

    /// Ingest one live push. Trust is clamped to [0,1]; a point older than
    /// the latest live observation is dropped so `observed_at` stays
    /// non-decreasing within the series.
    pub fn ingest_live(&mut self, snapshot: TrustSnapshot) {
        let snapshot = snapshot.clamped();
        if let Some(last) = &self.live {
            if snapshot.observed_at < last.observed_at {
                debug!(
                    observed_at = %snapshot.observed_at,
                    latest = %last.observed_at,
                    "dropping out-of-order live trust point"
                );
                return;
            }
        }
        self.live_tail.push(snapshot.clone());
        if self.live_tail.len() > self.history_capacity {
            self.live_tail.remove(0);
        }
        self.live = Some(snapshot);
    }

    /// Replace the historical backbone (fetched on demand, e.g. when the
    /// selected subject changes). Points are clamped and sorted by time.
    pub fn ingest_history(&mut self, mut series: Vec<TrustSnapshot>) {
        series = series.into_iter().map(TrustSnapshot::clamped).collect();
        series.sort_by_key(|s| s.observed_at);
        if series.len() > self.history_capacity {
            let excess = series.len() - self.history_capacity;
            series.drain(..excess);
        }
        self.history = series;
    }

    /// The snapshot callers should display now: the live point while fresh,
    /// else the last historical point. With no history at all, a stale live
    /// point is still returned — showing the last known value beats showing
    /// nothing — so `None` means no observation was ever ingested.
    pub fn current(&self) -> Option<TrustSnapshot> {
        self.current_at(Utc::now())
    }

    fn current_at(&self, now: DateTime<Utc>) -> Option<TrustSnapshot> {
        if let Some(live) = &self.live {
            let age = (now - live.observed_at).to_std().unwrap_or_default();
            if age < self.freshness_threshold {
                return Some(live.clone());
            }
        }
        self.history.last().cloned().or_else(|| self.live.clone())
    }

    /// Time-ordered series for charting: history backbone plus live points
    /// strictly after the last historical timestamp. On a timestamp tie the
    /// live value replaces the historical one. At most `limit` points,
    /// keeping the newest.
    pub fn series(&self, limit: usize) -> Vec<TrustSnapshot> {
        let mut merged = self.history.clone();
        for live in &self.live_tail {
            match merged.last() {
                Some(last) if live.observed_at < last.observed_at => continue,
                Some(last) if live.observed_at == last.observed_at => {
                    *merged.last_mut().expect("non-empty") = live.clone();
                }
                _ => merged.push(live.clone()),
            }
        }
        if merged.len() > limit {
            let excess = merged.len() - limit;
            merged.drain(..excess);
        }
        merged
    }

    /// Forget the live source, e.g. when a session is torn down.
    pub fn clear_live(&mut self) {
        self.live = None;
        self.live_tail.clear();
    }
}
