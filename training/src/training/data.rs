//! Feature-table I/O and seeded mini-batching for fusion training.
//!
//! A feature table is a CSV file with a header row. It carries `label` and/or
//! `label_id` plus any number of feature columns; only the columns of the
//! selected [`FeatureMode`] are read, in that mode's order.

use std::collections::BTreeSet;
use std::path::Path;

use candle_core::{Device, Tensor};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use emofuse_core::{EmoFuseError, Emotion, FeatureMode, Result, CANONICAL_EMOTIONS, NUM_CLASSES};
use emofuse_fusion::FeatureSet;

/// Labelled feature rows for one split.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    /// Column names in vector order.
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
    /// Canonical class indices.
    pub labels: Vec<usize>,
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.columns.len()
    }

    /// Distinct class indices present.
    pub fn label_set(&self) -> BTreeSet<usize> {
        self.labels.iter().copied().collect()
    }

    /// Per-class sample counts in canonical order.
    pub fn class_counts(&self) -> [usize; NUM_CLASSES] {
        let mut counts = [0; NUM_CLASSES];
        for &label in &self.labels {
            counts[label] += 1;
        }
        counts
    }
}

/// Read a feature table, keeping the columns of `mode`.
///
/// Blank cells and absent feature columns read as 0.0. `label_id` wins over
/// `label` when both are present; `label` is parsed strictly.
pub fn load_feature_table(path: &Path, mode: FeatureMode) -> Result<FeatureTable> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| {
        EmoFuseError::Data(format!("failed to open feature table {}: {e}", path.display()))
    })?;
    let headers = reader.headers().map_err(csv_error)?.clone();
    let position = |name: &str| headers.iter().position(|h| h.trim() == name);

    let columns = mode.column_names();
    let column_index: Vec<Option<usize>> = columns.iter().map(|c| position(c)).collect();
    for (name, idx) in columns.iter().zip(&column_index) {
        if idx.is_none() {
            tracing::warn!(column = %name, path = %path.display(), "Feature column absent, reading as 0.0");
        }
    }
    let label_idx = position("label");
    let label_id_idx = position("label_id");
    if label_idx.is_none() && label_id_idx.is_none() {
        return Err(EmoFuseError::Data(format!(
            "feature table {} has neither a label nor a label_id column",
            path.display()
        )));
    }

    let mut rows = Vec::new();
    let mut labels = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(csv_error)?;
        let cell = |idx: Option<usize>| idx.and_then(|i| record.get(i)).map(str::trim).unwrap_or("");

        let label = parse_label(cell(label_id_idx), cell(label_idx))
            .map_err(|e| EmoFuseError::Data(format!("{} row {}: {e}", path.display(), line + 1)))?;

        let mut row = Vec::with_capacity(columns.len());
        for (name, &idx) in columns.iter().zip(&column_index) {
            let raw = cell(idx);
            let value = if raw.is_empty() {
                0.0
            } else {
                raw.parse::<f64>().map_err(|_| {
                    EmoFuseError::Data(format!(
                        "{} row {}: column {name} is not a number: {raw:?}",
                        path.display(),
                        line + 1
                    ))
                })?
            };
            row.push(value);
        }
        rows.push(row);
        labels.push(label);
    }

    if rows.is_empty() {
        return Err(EmoFuseError::Data(format!(
            "empty feature file: {}",
            path.display()
        )));
    }

    tracing::debug!(path = %path.display(), rows = rows.len(), mode = %mode, "Loaded feature table");
    Ok(FeatureTable {
        columns,
        rows,
        labels,
    })
}

fn parse_label(label_id: &str, label: &str) -> std::result::Result<usize, String> {
    if !label_id.is_empty() {
        let id = label_id
            .parse::<f64>()
            .map_err(|_| format!("invalid label_id {label_id:?}"))?;
        if id.fract() != 0.0 || id < 0.0 || id >= NUM_CLASSES as f64 {
            return Err(format!("label_id {label_id} out of range"));
        }
        return Ok(id as usize);
    }
    label
        .parse::<Emotion>()
        .map(|e| e.index())
        .map_err(|e| e.to_string())
}

/// Write labelled feature sets with every canonical column.
pub fn write_feature_table(path: &Path, records: &[(Emotion, FeatureSet)]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let columns = FeatureMode::Fusion.columns();
    let mut writer = csv::Writer::from_path(path).map_err(csv_error)?;

    let mut header = vec!["label".to_string(), "label_id".to_string()];
    header.extend(columns.iter().map(|c| c.to_string()));
    writer.write_record(&header).map_err(csv_error)?;

    for (label, features) in records {
        let mut record = vec![label.code().to_string(), label.index().to_string()];
        record.extend(
            columns
                .iter()
                .map(|c| features.get(c).unwrap_or(0.0).to_string()),
        );
        writer.write_record(&record).map_err(csv_error)?;
    }
    writer.flush()?;
    Ok(())
}

/// Fail if `split` contains classes never seen in `train`.
pub fn check_label_coverage(train: &FeatureTable, split: &FeatureTable, split_name: &str) -> Result<()> {
    let known = train.label_set();
    let unseen: Vec<&str> = split
        .label_set()
        .difference(&known)
        .map(|&i| CANONICAL_EMOTIONS[i].code())
        .collect();
    if unseen.is_empty() {
        Ok(())
    } else {
        Err(EmoFuseError::Data(format!(
            "{split_name} split has labels absent from training: {}",
            unseen.join(", ")
        )))
    }
}

/// Build `[N, D]` f32 inputs and `[N]` u32 targets.
pub fn to_tensors(rows: &[Vec<f64>], labels: &[usize], device: &Device) -> Result<(Tensor, Tensor)> {
    let dim = rows.first().map_or(0, Vec::len);
    let flat: Vec<f32> = rows.iter().flatten().map(|&v| v as f32).collect();
    let inputs = Tensor::from_vec(flat, (rows.len(), dim), device)
        .map_err(|e| EmoFuseError::Model(format!("Failed to create input tensor: {e}")))?;
    let targets: Vec<u32> = labels.iter().map(|&l| l as u32).collect();
    let targets = Tensor::from_vec(targets, labels.len(), device)
        .map_err(|e| EmoFuseError::Model(format!("Failed to create label tensor: {e}")))?;
    Ok((inputs, targets))
}

/// A standardized training split held on the device, cut into seeded
/// mini-batches once per epoch.
pub struct TrainingBatches {
    inputs: Tensor,
    targets: Tensor,
    batch_size: usize,
}

impl TrainingBatches {
    /// Upload `rows`/`labels` and batch them `batch_size` at a time.
    pub fn from_rows(rows: &[Vec<f64>], labels: &[usize], batch_size: usize, device: &Device) -> Result<Self> {
        if batch_size == 0 {
            return Err(EmoFuseError::Config("batch_size must be > 0".to_string()));
        }
        let (inputs, targets) = to_tensors(rows, labels, device)?;
        Ok(Self {
            inputs,
            targets,
            batch_size,
        })
    }

    /// Whole split as `([N, D] f32, [N] u32)` tensors.
    pub fn tensors(&self) -> (&Tensor, &Tensor) {
        (&self.inputs, &self.targets)
    }

    pub fn len(&self) -> usize {
        self.inputs.dims().first().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Batches per epoch; the last one may be short.
    pub fn batch_count(&self) -> usize {
        self.len().div_ceil(self.batch_size)
    }

    /// Sample order for `epoch`, a permutation drawn from `seed + epoch`.
    pub fn epoch_order(&self, seed: u64, epoch: usize) -> Vec<u32> {
        let mut order: Vec<u32> = (0..self.len() as u32).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(epoch as u64));
        order.shuffle(&mut rng);
        order
    }

    /// Mini-batches of `epoch`, in the order given by [`Self::epoch_order`].
    pub fn epoch(&self, seed: u64, epoch: usize) -> impl Iterator<Item = Result<(Tensor, Tensor)>> + '_ {
        let order = self.epoch_order(seed, epoch);
        let batch_size = self.batch_size;
        (0..self.batch_count()).map(move |b| {
            let chunk = &order[b * batch_size..((b + 1) * batch_size).min(order.len())];
            self.gather(chunk)
        })
    }

    fn gather(&self, rows: &[u32]) -> Result<(Tensor, Tensor)> {
        Tensor::new(rows, self.inputs.device())
            .and_then(|idx| Ok((self.inputs.index_select(&idx, 0)?, self.targets.index_select(&idx, 0)?)))
            .map_err(|e| EmoFuseError::Model(format!("Failed to gather batch: {e}")))
    }
}

fn csv_error(e: csv::Error) -> EmoFuseError {
    EmoFuseError::Data(format!("CSV error: {e}"))
}
