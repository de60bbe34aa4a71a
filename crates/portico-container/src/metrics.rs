// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Ingress counters. Observability only; nothing protocol-visible.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters maintained by the ingress.
#[derive(Debug, Default)]
pub struct ProxyMetrics {
    successful_requests: AtomicU64,
    service_unavailable_count: AtomicU64,
}

impl ProxyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self) {
        self.successful_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_service_unavailable(&self) {
        self.service_unavailable_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn successful_requests(&self) -> u64 {
        self.successful_requests.load(Ordering::Relaxed)
    }

    pub fn service_unavailable_count(&self) -> u64 {
        self.service_unavailable_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = ProxyMetrics::new();
        metrics.record_success();
        metrics.record_success();
        metrics.record_service_unavailable();
        assert_eq!(metrics.successful_requests(), 2);
        assert_eq!(metrics.service_unavailable_count(), 1);
    }
}
