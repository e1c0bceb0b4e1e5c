//! In-process metric registry.
//!
//! Metrics are registered once at startup and mutated by observations for the
//! lifetime of the process. Each metric guards its series set with its own
//! mutex, so a snapshot never sees a half-applied histogram update, while
//! observations on different metrics never contend.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock},
    time::SystemTime,
};

use crate::error::MetricsError;

/// Bucket boundaries used by Prometheus client libraries, in seconds.
pub const DEFAULT_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Histogram,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Histogram => "histogram",
        }
    }
}

/// Static description of a metric, handed to [`MetricRegistry::register`].
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    name: String,
    help: String,
    label_names: Vec<String>,
    kind: MetricKind,
    buckets: Vec<f64>,
}

impl Metric {
    pub fn counter(name: &str, help: &str, label_names: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            label_names: label_names.iter().map(|l| l.to_string()).collect(),
            kind: MetricKind::Counter,
            buckets: Vec::new(),
        }
    }

    /// `buckets` are the finite upper bounds; `+Inf` is implicit.
    pub fn histogram(name: &str, help: &str, label_names: &[&str], buckets: &[f64]) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            label_names: label_names.iter().map(|l| l.to_string()).collect(),
            kind: MetricKind::Histogram,
            buckets: buckets.to_vec(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn label_names(&self) -> &[String] {
        &self.label_names
    }

    fn validate(&self) -> Result<(), MetricsError> {
        if !is_valid_metric_name(&self.name) {
            return Err(MetricsError::InvalidName(self.name.clone()));
        }
        for label in &self.label_names {
            let reserved = self.kind == MetricKind::Histogram && label == "le";
            if reserved || !is_valid_label_name(label) {
                return Err(MetricsError::InvalidName(label.clone()));
            }
        }
        if self.kind == MetricKind::Histogram {
            let invalid = |reason| MetricsError::InvalidBuckets { name: self.name.clone(), reason };
            if self.buckets.is_empty() {
                return Err(invalid("no buckets"));
            }
            if self.buckets.iter().any(|b| !b.is_finite()) {
                return Err(invalid("bucket bounds must be finite"));
            }
            if self.buckets.windows(2).any(|w| w[0] >= w[1]) {
                return Err(invalid("bucket bounds must be strictly ascending"));
            }
        }
        Ok(())
    }
}

/// A single measurement addressed to a registered metric.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub name: String,
    pub label_values: Vec<String>,
    pub value: f64,
    pub timestamp: SystemTime,
}

impl Observation {
    pub fn new(name: &str, label_values: Vec<String>, value: f64) -> Self {
        Self {
            name: name.to_string(),
            label_values,
            value,
            timestamp: SystemTime::now(),
        }
    }
}

/// Cumulative histogram state of one series.
///
/// `buckets[i].1` counts every observation `<= buckets[i].0`; the `+Inf`
/// bucket equals `count`.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramValue {
    pub buckets: Vec<(f64, u64)>,
    pub sum: f64,
    pub count: u64,
}

impl HistogramValue {
    fn new(bounds: &[f64]) -> Self {
        Self {
            buckets: bounds.iter().map(|b| (*b, 0)).collect(),
            sum: 0.0,
            count: 0,
        }
    }

    fn observe(&mut self, v: f64) {
        for (bound, hits) in self.buckets.iter_mut() {
            if *bound >= v {
                *hits += 1;
            }
        }
        self.sum += v;
        self.count += 1;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SeriesValue {
    Counter(f64),
    Histogram(HistogramValue),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSnapshot {
    pub label_values: Vec<String>,
    pub value: SeriesValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricSnapshot {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub label_names: Vec<String>,
    pub series: Vec<SeriesSnapshot>,
}

impl MetricSnapshot {
    pub fn series(&self, label_values: &[&str]) -> Option<&SeriesValue> {
        self.series
            .iter()
            .find(|s| s.label_values.iter().map(String::as_str).eq(label_values.iter().copied()))
            .map(|s| &s.value)
    }
}

/// Point-in-time copy of every metric, in registration order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RegistrySnapshot {
    pub metrics: Vec<MetricSnapshot>,
}

impl RegistrySnapshot {
    pub fn get(&self, name: &str) -> Option<&MetricSnapshot> {
        self.metrics.iter().find(|m| m.name == name)
    }
}

/// Series of one metric in first-seen order.
#[derive(Default)]
struct SeriesSet {
    index: HashMap<Vec<String>, usize>,
    series: Vec<SeriesSnapshot>,
}

struct Entry {
    metric: Metric,
    series: Mutex<SeriesSet>,
}

#[derive(Default)]
struct Inner {
    entries: Vec<Arc<Entry>>,
    by_name: HashMap<String, usize>,
}

/// Collector of named counters and histograms.
///
/// Constructed explicitly and shared as `Arc<MetricRegistry>`, so every test
/// can work on a fresh instance.
#[derive(Default)]
pub struct MetricRegistry {
    inner: RwLock<Inner>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, metric: Metric) -> Result<(), MetricsError> {
        metric.validate()?;
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.by_name.contains_key(&metric.name) {
            return Err(MetricsError::DuplicateMetricName(metric.name));
        }
        let idx = inner.entries.len();
        inner.by_name.insert(metric.name.clone(), idx);
        log::debug!("registered {} metric {}", metric.kind.as_str(), metric.name);
        inner.entries.push(Arc::new(Entry {
            metric,
            series: Mutex::new(SeriesSet::default()),
        }));
        Ok(())
    }

    /// Apply `value` to the series selected by `label_values`.
    ///
    /// Counters add `value`; histograms record it. Nothing is mutated when an
    /// error is returned.
    pub fn observe(&self, name: &str, label_values: &[&str], value: f64) -> Result<(), MetricsError> {
        self.apply(name, label_values, value)
    }

    pub fn record(&self, observation: &Observation) -> Result<(), MetricsError> {
        self.apply(&observation.name, &observation.label_values, observation.value)
    }

    pub fn inc(&self, name: &str, label_values: &[&str]) -> Result<(), MetricsError> {
        self.apply(name, label_values, 1.0)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let entries = self.read().entries.clone();
        let metrics = entries
            .iter()
            .map(|entry| {
                let set = lock(&entry.series);
                MetricSnapshot {
                    name: entry.metric.name.clone(),
                    help: entry.metric.help.clone(),
                    kind: entry.metric.kind,
                    label_names: entry.metric.label_names.clone(),
                    series: set.series.clone(),
                }
            })
            .collect();
        RegistrySnapshot { metrics }
    }

    fn apply<S: AsRef<str>>(&self, name: &str, label_values: &[S], value: f64) -> Result<(), MetricsError> {
        let entry = {
            let inner = self.read();
            match inner.by_name.get(name) {
                Some(idx) => inner.entries[*idx].clone(),
                None => return Err(MetricsError::UnknownMetric(name.to_string())),
            }
        };
        let metric = &entry.metric;
        if label_values.len() != metric.label_names.len() {
            return Err(MetricsError::LabelCardinalityMismatch {
                name: name.to_string(),
                expected: metric.label_names.len(),
                actual: label_values.len(),
            });
        }
        let negative_counter = metric.kind == MetricKind::Counter && value < 0.0;
        if value.is_nan() || negative_counter {
            return Err(MetricsError::InvalidValue { name: name.to_string(), value });
        }

        let key: Vec<String> = label_values.iter().map(|v| v.as_ref().to_string()).collect();
        let mut set = lock(&entry.series);
        let idx = match set.index.get(&key) {
            Some(idx) => *idx,
            None => {
                let initial = match metric.kind {
                    MetricKind::Counter => SeriesValue::Counter(0.0),
                    MetricKind::Histogram => SeriesValue::Histogram(HistogramValue::new(&metric.buckets)),
                };
                let idx = set.series.len();
                set.series.push(SeriesSnapshot {
                    label_values: key.clone(),
                    value: initial,
                });
                set.index.insert(key, idx);
                idx
            }
        };
        match &mut set.series[idx].value {
            SeriesValue::Counter(total) => *total += value,
            SeriesValue::Histogram(hist) => hist.observe(value),
        }
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }
}

fn lock(series: &Mutex<SeriesSet>) -> MutexGuard<'_, SeriesSet> {
    series.lock().unwrap_or_else(PoisonError::into_inner)
}

fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req_duration() -> MetricRegistry {
        let registry = MetricRegistry::new();
        registry
            .register(Metric::histogram("req_duration", "request duration", &["method"], &[0.1, 0.5, 1.0]))
            .unwrap();
        registry
    }

    fn histogram<'a>(snapshot: &'a RegistrySnapshot, name: &str, labels: &[&str]) -> &'a HistogramValue {
        match snapshot.get(name).and_then(|m| m.series(labels)) {
            Some(SeriesValue::Histogram(h)) => h,
            other => panic!("expected histogram series, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let registry = req_duration();
        let err = registry.register(Metric::counter("req_duration", "again", &[])).unwrap_err();
        assert_eq!(err, MetricsError::DuplicateMetricName("req_duration".to_string()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unknown_metric_is_rejected() {
        let registry = MetricRegistry::new();
        let err = registry.observe("nope", &[], 1.0).unwrap_err();
        assert_eq!(err, MetricsError::UnknownMetric("nope".to_string()));
    }

    #[test]
    fn cardinality_mismatch_does_not_mutate() {
        let registry = req_duration();
        registry.observe("req_duration", &["GET"], 0.3).unwrap();
        let before = registry.snapshot();

        let err = registry.observe("req_duration", &["GET", "/x"], 0.3).unwrap_err();
        assert!(matches!(err, MetricsError::LabelCardinalityMismatch { expected: 1, actual: 2, .. }));
        let err = registry.observe("req_duration", &[], 0.3).unwrap_err();
        assert!(matches!(err, MetricsError::LabelCardinalityMismatch { expected: 1, actual: 0, .. }));

        assert_eq!(registry.snapshot(), before);
    }

    #[test]
    fn histogram_buckets_are_cumulative() {
        let registry = req_duration();
        registry.observe("req_duration", &["GET"], 0.3).unwrap();
        registry.observe("req_duration", &["GET"], 2.0).unwrap();

        let snapshot = registry.snapshot();
        let hist = histogram(&snapshot, "req_duration", &["GET"]);
        assert_eq!(hist.buckets, vec![(0.1, 0), (0.5, 1), (1.0, 1)]);
        assert_eq!(hist.count, 2);
        assert!((hist.sum - 2.3).abs() < 1e-9);
    }

    #[test]
    fn bucket_counts_never_decrease_and_totals_match() {
        let registry = req_duration();
        let values = [0.0, 0.05, 0.1, 0.1000001, 0.42, 0.5, 0.99, 1.0, 3.5, 17.0, 0.07];
        for v in values {
            registry.observe("req_duration", &["POST"], v).unwrap();
        }

        let snapshot = registry.snapshot();
        let hist = histogram(&snapshot, "req_duration", &["POST"]);
        assert!(hist.buckets.windows(2).all(|w| w[0].1 <= w[1].1));
        assert!(hist.buckets.iter().all(|(_, hits)| *hits <= hist.count));
        assert_eq!(hist.count, values.len() as u64);
        assert!((hist.sum - values.iter().sum::<f64>()).abs() < 1e-9);
        // boundary values land in their own bucket
        assert_eq!(hist.buckets[0].1, 4);
    }

    #[test]
    fn label_sets_are_independent_and_first_seen_ordered() {
        let registry = MetricRegistry::new();
        registry.register(Metric::counter("hits", "hits", &["path"])).unwrap();
        registry.inc("hits", &["/b"]).unwrap();
        registry.inc("hits", &["/a"]).unwrap();
        registry.observe("hits", &["/b"], 2.0).unwrap();

        let snapshot = registry.snapshot();
        let hits = snapshot.get("hits").unwrap();
        let order: Vec<_> = hits.series.iter().map(|s| s.label_values[0].as_str()).collect();
        assert_eq!(order, vec!["/b", "/a"]);
        assert_eq!(hits.series(&["/b"]), Some(&SeriesValue::Counter(3.0)));
        assert_eq!(hits.series(&["/a"]), Some(&SeriesValue::Counter(1.0)));
    }

    #[test]
    fn record_accepts_prebuilt_observation() {
        let registry = req_duration();
        let obs = Observation::new("req_duration", vec!["GET".to_string()], 0.2);
        registry.record(&obs).unwrap();
        let snapshot = registry.snapshot();
        assert_eq!(histogram(&snapshot, "req_duration", &["GET"]).count, 1);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let registry = req_duration();
        registry.register(Metric::counter("total", "total", &[])).unwrap();
        assert!(matches!(registry.observe("total", &[], -1.0), Err(MetricsError::InvalidValue { .. })));
        assert!(matches!(registry.observe("req_duration", &["GET"], f64::NAN), Err(MetricsError::InvalidValue { .. })));
        assert!(registry.snapshot().get("total").unwrap().series.is_empty());
    }

    #[test]
    fn registration_validates_names_and_buckets() {
        let registry = MetricRegistry::new();
        assert!(matches!(registry.register(Metric::counter("1bad", "", &[])), Err(MetricsError::InvalidName(_))));
        assert!(matches!(registry.register(Metric::counter("ok", "", &["bad-label"])), Err(MetricsError::InvalidName(_))));
        assert!(matches!(
            registry.register(Metric::histogram("h", "", &["le"], &[1.0])),
            Err(MetricsError::InvalidName(_))
        ));
        assert!(matches!(registry.register(Metric::histogram("h", "", &[], &[])), Err(MetricsError::InvalidBuckets { .. })));
        assert!(matches!(
            registry.register(Metric::histogram("h", "", &[], &[1.0, 0.5])),
            Err(MetricsError::InvalidBuckets { .. })
        ));
        assert!(matches!(
            registry.register(Metric::histogram("h", "", &[], &[1.0, f64::INFINITY])),
            Err(MetricsError::InvalidBuckets { .. })
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn concurrent_observations_are_not_lost() {
        let registry = Arc::new(req_duration());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        registry.observe("req_duration", &["GET"], 0.25).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = registry.snapshot();
        let hist = histogram(&snapshot, "req_duration", &["GET"]);
        assert_eq!(hist.count, 8000);
        assert_eq!(hist.buckets, vec![(0.1, 0), (0.5, 8000), (1.0, 8000)]);
        assert!((hist.sum - 2000.0).abs() < 1e-6);
    }
}
