//! # Pipeline Orchestrator
//!
//! Sequences one run from uploaded file to prediction:
//!
//! 1. **Validate** the stored upload (extension, non-empty)
//! 2. **Segment**: decode, cut into windows, write `split/segment_NNN.wav`
//! 3. **Resample**: read each split file back, convert to the canonical rate
//! 4. **Extract**: one feature vector per segment, aggregated into a table
//! 5. **Classify**: scale the table and score every row
//! 6. **Reduce**: average the scores into one decision
//!
//! ## Guarantees:
//! - progress is reported on entry to each stage, in order
//! - exactly one result event per run, success or failure
//! - the run workspace is removed on every exit path (it is dropped here)
//! - cancellation is observed at stage boundaries and between segments
//!
//! The orchestrator is synchronous and runs on tokio's blocking pool; nothing in here
//! awaits.

use crate::audio::{decode_file, resample, segment, SegmentStore};
use crate::classifier::Classifier;
use crate::config::{AppConfig, DecodeFailurePolicy};
use crate::error::PipelineError;
use crate::features::schema::describe_column_difference;
use crate::features::{aggregate, ExtractionError, FeatureExtractor, FeatureTable};
use crate::pipeline::events::{PredictionResult, ProgressSender};
use crate::pipeline::reducer::reduce;
use crate::pipeline::run::{RunStage, RunTracker};
use crate::pipeline::workspace::RunWorkspace;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn};

/// Per-run settings, snapshotted from the configuration when the run starts.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub window_seconds: f64,
    pub canonical_sample_rate: u32,
    pub feature_set: String,
    pub feature_level: String,
    pub decode_failure_policy: DecodeFailurePolicy,
    pub allowed_extensions: Vec<String>,
    pub feature_table_dir: Option<PathBuf>,
    pub condition_name: String,
}

impl From<&AppConfig> for PipelineSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            window_seconds: config.pipeline.window_seconds,
            canonical_sample_rate: config.pipeline.canonical_sample_rate,
            feature_set: config.pipeline.feature_set.clone(),
            feature_level: config.pipeline.feature_level.clone(),
            decode_failure_policy: config.pipeline.decode_failure_policy,
            allowed_extensions: config.upload.allowed_extensions.clone(),
            feature_table_dir: config.pipeline.feature_table_dir.as_ref().map(PathBuf::from),
            condition_name: config.pipeline.condition_name.clone(),
        }
    }
}

pub struct PipelineOrchestrator {
    settings: PipelineSettings,
    extractor: Arc<dyn FeatureExtractor>,
    classifier: Arc<dyn Classifier>,
}

impl PipelineOrchestrator {
    /// Check that settings, extractor and classifier agree before any run starts.
    ///
    /// Any disagreement is a configuration error (`SchemaMismatch`), never something
    /// to skip per segment.
    pub fn new(
        settings: PipelineSettings,
        extractor: Arc<dyn FeatureExtractor>,
        classifier: Arc<dyn Classifier>,
    ) -> Result<Self, PipelineError> {
        let config = extractor.config();
        if config.sample_rate != settings.canonical_sample_rate {
            return Err(PipelineError::SchemaMismatch(format!(
                "extractor runs at {} Hz but the pipeline resamples to {} Hz",
                config.sample_rate, settings.canonical_sample_rate
            )));
        }
        if config.feature_set != settings.feature_set || config.level != settings.feature_level {
            return Err(PipelineError::SchemaMismatch(format!(
                "extractor produces '{}' at level '{}' but '{}' at level '{}' is configured",
                config.feature_set, config.level, settings.feature_set, settings.feature_level
            )));
        }

        let schema = extractor.feature_schema();
        if let Some(difference) = describe_column_difference(classifier.schema(), schema.names()) {
            return Err(PipelineError::SchemaMismatch(format!(
                "extractor output does not match the fitted scaler: {}",
                difference
            )));
        }

        Ok(Self { settings, extractor, classifier })
    }

    /// Run the whole pipeline for `input`, which must live inside `workspace`.
    ///
    /// Consumes the workspace so its directory is removed before this returns. The
    /// returned result is the same one sent as the terminal event.
    pub fn run(
        &self,
        workspace: RunWorkspace,
        input: &Path,
        sender: ProgressSender,
        cancel: &CancellationToken,
    ) -> PredictionResult {
        let run_id = workspace.run_id();
        let span = info_span!("run", run_id = %run_id);
        let _entered = span.enter();

        let mut tracker = RunTracker::new(run_id, sender);
        let outcome = match self.execute(&workspace, input, &mut tracker, cancel) {
            Ok(result) => match tracker.complete(result.clone()) {
                Ok(()) => {
                    info!(
                        label = ?result.label(),
                        percentage = result.percentage(),
                        "Run completed"
                    );
                    result
                }
                Err(e) => {
                    warn!(error = %e, "Run completed but the caller is gone");
                    tracker.fail(&e);
                    PredictionResult::from_error(&e)
                }
            },
            Err(e) => {
                match &e {
                    PipelineError::Validation(_) | PipelineError::Cancelled => {
                        info!(stage = tracker.stage().as_str(), reason = %e, "Run stopped")
                    }
                    _ => error!(stage = tracker.stage().as_str(), error = %e, "Run failed"),
                }
                tracker.fail(&e);
                PredictionResult::from_error(&e)
            }
        };

        drop(workspace);
        outcome
    }

    fn execute(
        &self,
        workspace: &RunWorkspace,
        input: &Path,
        tracker: &mut RunTracker,
        cancel: &CancellationToken,
    ) -> Result<PredictionResult, PipelineError> {
        self.validate_input(input)?;
        tracker.advance(RunStage::Validated)?;

        checkpoint(cancel)?;
        tracker.advance(RunStage::Segmenting)?;
        let store = SegmentStore::create(workspace.path())?;
        let ordinals = self.segment_stage(input, &store)?;

        checkpoint(cancel)?;
        tracker.advance(RunStage::Resampling)?;
        let ordinals = self.resample_stage(&store, &ordinals, cancel)?;

        checkpoint(cancel)?;
        tracker.advance(RunStage::Extracting)?;
        let table = self.extract_stage(&store, &ordinals, cancel)?;
        self.persist_table(&table, workspace)?;

        checkpoint(cancel)?;
        tracker.advance(RunStage::Classifying)?;
        let probabilities = self.classify_stage(&table)?;

        checkpoint(cancel)?;
        tracker.advance(RunStage::Reducing)?;
        reduce(&probabilities)
    }

    fn validate_input(&self, input: &Path) -> Result<(), PipelineError> {
        let extension = input
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        if !self.settings.allowed_extensions.iter().any(|allowed| *allowed == extension) {
            return Err(PipelineError::Validation(INVALID_FILE_TYPE.to_string()));
        }

        let metadata = std::fs::metadata(input)
            .map_err(|_| PipelineError::Validation("Uploaded file not found".to_string()))?;
        if metadata.len() == 0 {
            return Err(PipelineError::Validation("Uploaded file is empty".to_string()));
        }
        Ok(())
    }

    /// Decode and split the upload. Returns the ordinals written.
    pub(crate) fn segment_stage(&self, input: &Path, store: &SegmentStore) -> Result<Vec<usize>, PipelineError> {
        let waveform = decode_file(input)?;
        let segments = segment(&waveform, self.settings.window_seconds)?;
        info!(
            duration_seconds = waveform.duration_seconds(),
            sample_rate = waveform.sample_rate(),
            segments = segments.len(),
            "Split recording"
        );
        drop(waveform);

        segments
            .iter()
            .map(|segment| store.write_split(segment).map(|_| segment.ordinal))
            .collect()
    }

    /// Resample every split file. Returns the ordinals that made it through.
    pub(crate) fn resample_stage(
        &self,
        store: &SegmentStore,
        ordinals: &[usize],
        cancel: &CancellationToken,
    ) -> Result<Vec<usize>, PipelineError> {
        let mut kept = Vec::with_capacity(ordinals.len());
        for &ordinal in ordinals {
            checkpoint(cancel)?;
            let Some(segment) = self.apply_decode_policy(store.read_split(ordinal))? else {
                continue;
            };
            let resampled = resample(&segment, self.settings.canonical_sample_rate)?;
            store.write_resampled(&resampled)?;
            kept.push(ordinal);
        }

        if kept.is_empty() {
            return Err(PipelineError::NoUsableSegments);
        }
        Ok(kept)
    }

    /// Extract features for every resampled file and aggregate them.
    ///
    /// Short or non-finite segments are dropped; a sample-rate mismatch aborts the run.
    pub(crate) fn extract_stage(
        &self,
        store: &SegmentStore,
        ordinals: &[usize],
        cancel: &CancellationToken,
    ) -> Result<FeatureTable, PipelineError> {
        let mut results = Vec::with_capacity(ordinals.len());
        for &ordinal in ordinals {
            checkpoint(cancel)?;
            let Some(segment) = self.apply_decode_policy(store.read_resampled(ordinal))? else {
                continue;
            };
            // A segment at the wrong rate means the stages disagree; no other segment is safe either.
            match self.extractor.extract(&segment) {
                Err(e @ ExtractionError::RateMismatch { .. }) => {
                    return Err(PipelineError::SchemaMismatch(e.to_string()));
                }
                outcome => results.push((ordinal, outcome)),
            }
        }

        let table = aggregate(results)?;
        info!(rows = table.n_rows(), columns = table.n_cols(), "Extracted features");
        Ok(table)
    }

    fn classify_stage(&self, table: &FeatureTable) -> Result<Vec<f64>, PipelineError> {
        let scaled = self.classifier.scale(table)?;
        let probabilities = self.classifier.predict_probabilities(&scaled)?;
        if probabilities.len() != table.n_rows() {
            return Err(PipelineError::Classification(format!(
                "expected {} probabilities, got {}",
                table.n_rows(),
                probabilities.len()
            )));
        }
        if probabilities.iter().any(|p| !p.is_finite() || !(0.0..=1.0).contains(p)) {
            return Err(PipelineError::Classification(
                "classifier returned a probability outside [0, 1]".to_string(),
            ));
        }
        Ok(probabilities)
    }

    /// Write the run's feature table, and keep a copy when a table directory is configured.
    fn persist_table(&self, table: &FeatureTable, workspace: &RunWorkspace) -> Result<(), PipelineError> {
        let path = workspace.feature_table_path();
        table.write_csv(&path)?;

        if let Some(dir) = &self.settings.feature_table_dir {
            let target = dir.join(format!("{}.csv", workspace.run_id()));
            let copied = std::fs::create_dir_all(dir).and_then(|_| std::fs::copy(&path, &target));
            match copied {
                Ok(_) => info!(path = %target.display(), "Kept feature table"),
                Err(e) => warn!(path = %target.display(), error = %e, "Could not keep feature table"),
            }
        }
        Ok(())
    }

    fn apply_decode_policy<T>(&self, read: Result<T, PipelineError>) -> Result<Option<T>, PipelineError> {
        match read {
            Ok(value) => Ok(Some(value)),
            Err(e @ PipelineError::Decode { .. }) => match self.settings.decode_failure_policy {
                DecodeFailurePolicy::Abort => Err(e),
                DecodeFailurePolicy::Skip => {
                    warn!(error = %e, "Skipping undecodable segment");
                    Ok(None)
                }
            },
            Err(e) => Err(e),
        }
    }
}

pub const INVALID_FILE_TYPE: &str = "Invalid file type. Only MP3 and WAV files are allowed.";

fn checkpoint(cancel: &CancellationToken) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ScaledTable;
    use crate::features::{ExtractorConfig, FeatureSchema, FeatureVector, FunctionalsExtractor};
    use crate::audio::ResampledSegment;
    use crate::pipeline::events::{Label, ProgressEvent};
    use candle_core::{DType, Device, Tensor};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    /// Returns fixed probabilities and counts how often it was asked.
    struct StubClassifier {
        names: Vec<String>,
        probabilities: Vec<f64>,
        calls: AtomicUsize,
    }

    impl StubClassifier {
        fn new(probabilities: Vec<f64>) -> Self {
            Self {
                names: FunctionalsExtractor::feature_names(),
                probabilities,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Classifier for StubClassifier {
        fn schema(&self) -> &[String] {
            &self.names
        }

        fn scale(&self, table: &FeatureTable) -> Result<ScaledTable, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let values = Tensor::zeros((table.n_rows(), table.n_cols()), DType::F64, &Device::Cpu)?;
            Ok(ScaledTable::new(table.labels().to_vec(), values))
        }

        fn predict_probabilities(&self, scaled: &ScaledTable) -> Result<Vec<f64>, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.probabilities.iter().copied().cycle().take(scaled.n_rows()).collect())
        }
    }

    /// Same identity as the built-in extractor, but every segment fails.
    struct FailingExtractor {
        inner: FunctionalsExtractor,
    }

    impl FeatureExtractor for FailingExtractor {
        fn config(&self) -> &ExtractorConfig {
            self.inner.config()
        }

        fn feature_schema(&self) -> Arc<FeatureSchema> {
            self.inner.feature_schema()
        }

        fn extract(&self, segment: &ResampledSegment) -> Result<FeatureVector, ExtractionError> {
            Err(ExtractionError::TooShort { ordinal: segment.ordinal, samples: 0, required: 1 })
        }
    }

    /// Claims the configured rate but reports every segment as arriving at another one.
    struct MisratedExtractor {
        inner: FunctionalsExtractor,
    }

    impl FeatureExtractor for MisratedExtractor {
        fn config(&self) -> &ExtractorConfig {
            self.inner.config()
        }

        fn feature_schema(&self) -> Arc<FeatureSchema> {
            self.inner.feature_schema()
        }

        fn extract(&self, segment: &ResampledSegment) -> Result<FeatureVector, ExtractionError> {
            Err(ExtractionError::RateMismatch {
                ordinal: segment.ordinal,
                expected: self.inner.config().sample_rate,
                actual: segment.sample_rate / 2,
            })
        }
    }

    fn settings(rate: u32) -> PipelineSettings {
        let mut config = AppConfig::default();
        config.pipeline.canonical_sample_rate = rate;
        PipelineSettings::from(&config)
    }

    fn write_tone(path: &Path, rate: u32, seconds: f64) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let n = (rate as f64 * seconds) as usize;
        for i in 0..n {
            let t = i as f32 / rate as f32;
            let sample = 0.3 * (2.0 * std::f32::consts::PI * 220.0 * t).sin();
            writer.write_sample((sample * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn drain(rx: &mut UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn percentages(events: &[ProgressEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Progress { percentage, .. } => Some(*percentage),
                ProgressEvent::Result(_) => None,
            })
            .collect()
    }

    struct Harness {
        _root: tempfile::TempDir,
        workspace: RunWorkspace,
        input: PathBuf,
    }

    fn harness(filename: &str) -> Harness {
        let root = tempfile::tempdir().unwrap();
        let workspace = RunWorkspace::create(root.path()).unwrap();
        let input = workspace.input_path(filename);
        Harness { _root: root, workspace, input }
    }

    fn run(
        orchestrator: &PipelineOrchestrator,
        harness: Harness,
        cancel: &CancellationToken,
    ) -> (PredictionResult, Vec<ProgressEvent>, PathBuf) {
        let (tx, mut rx) = unbounded_channel();
        let workspace_path = harness.workspace.path().to_path_buf();
        let result = orchestrator.run(harness.workspace, &harness.input, ProgressSender::new(tx), cancel);
        (result, drain(&mut rx), workspace_path)
    }

    #[test]
    fn test_long_recording_end_to_end() {
        let classifier = Arc::new(StubClassifier::new(vec![0.9, 0.8, 0.95]));
        let orchestrator = PipelineOrchestrator::new(
            settings(8000),
            Arc::new(FunctionalsExtractor::new(8000)),
            classifier.clone(),
        )
        .unwrap();

        let harness = harness("recording.wav");
        write_tone(&harness.input, 8000, 150.0);
        let (result, events, workspace_path) = run(&orchestrator, harness, &CancellationToken::new());

        assert!(result.success());
        assert_eq!(result.label(), Some(Label::Positive));
        assert!((result.percentage() - 88.333_333).abs() < 1e-4);
        assert_eq!(percentages(&events), vec![20, 30, 50, 70, 90, 95, 100]);
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert!(events.last().unwrap().is_terminal());
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 2);
        assert!(!workspace_path.exists());
    }

    #[test]
    fn test_end_to_end_through_resampler() {
        let tables = tempfile::tempdir().unwrap();
        let mut settings = settings(16000);
        settings.feature_table_dir = Some(tables.path().to_path_buf());
        let classifier = Arc::new(StubClassifier::new(vec![0.9, 0.8, 0.95]));
        let orchestrator = PipelineOrchestrator::new(
            settings,
            Arc::new(FunctionalsExtractor::new(16000)),
            classifier.clone(),
        )
        .unwrap();

        let harness = harness("recording.wav");
        write_tone(&harness.input, 22050, 150.0);
        let run_id = harness.workspace.run_id();
        let (result, events, workspace_path) = run(&orchestrator, harness, &CancellationToken::new());

        assert!(result.success());
        assert_eq!(result.label(), Some(Label::Positive));
        assert!((result.percentage() - 88.333_333).abs() < 1e-4);
        assert_eq!(percentages(&events), vec![20, 30, 50, 70, 90, 95, 100]);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 2);
        assert!(!workspace_path.exists());

        let kept = std::fs::read_to_string(tables.path().join(format!("{}.csv", run_id))).unwrap();
        let rows: Vec<&str> = kept.lines().skip(1).filter_map(|line| line.split(',').next()).collect();
        assert_eq!(rows, vec!["segment_001", "segment_002", "segment_003"]);
    }

    #[test]
    fn test_rate_mismatch_during_extraction_aborts_run() {
        let classifier = Arc::new(StubClassifier::new(vec![0.9]));
        let orchestrator = PipelineOrchestrator::new(
            settings(8000),
            Arc::new(MisratedExtractor { inner: FunctionalsExtractor::new(8000) }),
            classifier.clone(),
        )
        .unwrap();

        let root = tempfile::tempdir().unwrap();
        let store = SegmentStore::create(root.path()).unwrap();
        let input = root.path().join("input.wav");
        write_tone(&input, 8000, 3.0);
        let ordinals = orchestrator.segment_stage(&input, &store).unwrap();
        let cancel = CancellationToken::new();
        let kept = orchestrator.resample_stage(&store, &ordinals, &cancel).unwrap();
        let outcome = orchestrator.extract_stage(&store, &kept, &cancel);
        assert!(matches!(outcome, Err(PipelineError::SchemaMismatch(_))));

        let harness = harness("recording.wav");
        write_tone(&harness.input, 8000, 3.0);
        let (result, events, workspace_path) = run(&orchestrator, harness, &cancel);

        assert!(!result.success());
        assert!(result.message().unwrap().starts_with("Error processing file: Feature schema mismatch"));
        assert_eq!(percentages(&events), vec![20, 30, 50, 70]);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
        assert!(!workspace_path.exists());
    }

    #[test]
    fn test_resamples_to_canonical_rate() {
        let mut settings = settings(8000);
        settings.window_seconds = 1.0;
        let orchestrator = PipelineOrchestrator::new(
            settings,
            Arc::new(FunctionalsExtractor::new(8000)),
            Arc::new(StubClassifier::new(vec![0.2])),
        )
        .unwrap();

        let root = tempfile::tempdir().unwrap();
        let store = SegmentStore::create(root.path()).unwrap();
        let input = root.path().join("input.wav");
        write_tone(&input, 16000, 2.5);

        let ordinals = orchestrator.segment_stage(&input, &store).unwrap();
        assert_eq!(ordinals, vec![1, 2, 3]);
        let kept = orchestrator.resample_stage(&store, &ordinals, &CancellationToken::new()).unwrap();
        assert_eq!(kept, ordinals);

        let last = store.read_resampled(3).unwrap();
        assert_eq!(last.sample_rate, 8000);
        assert_eq!(last.samples.len(), 4000);
    }

    #[test]
    fn test_invalid_extension_emits_no_progress() {
        let classifier = Arc::new(StubClassifier::new(vec![0.9]));
        let orchestrator = PipelineOrchestrator::new(
            settings(8000),
            Arc::new(FunctionalsExtractor::new(8000)),
            classifier.clone(),
        )
        .unwrap();

        let harness = harness("notes.txt");
        std::fs::write(&harness.input, b"hello").unwrap();
        let (result, events, workspace_path) = run(&orchestrator, harness, &CancellationToken::new());

        assert!(!result.success());
        assert_eq!(result.message(), Some(INVALID_FILE_TYPE));
        assert_eq!(events.len(), 1);
        assert!(events[0].is_terminal());
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
        assert!(!workspace_path.exists());
    }

    #[test]
    fn test_unreadable_audio_fails_after_validation() {
        let orchestrator = PipelineOrchestrator::new(
            settings(8000),
            Arc::new(FunctionalsExtractor::new(8000)),
            Arc::new(StubClassifier::new(vec![0.9])),
        )
        .unwrap();

        let harness = harness("broken.mp3");
        std::fs::write(&harness.input, b"this is not an mp3 stream").unwrap();
        let (result, events, workspace_path) = run(&orchestrator, harness, &CancellationToken::new());

        assert!(!result.success());
        assert!(result.message().unwrap().starts_with("Error processing file: "));
        assert_eq!(percentages(&events), vec![20, 30]);
        assert!(!workspace_path.exists());
    }

    #[test]
    fn test_every_extraction_failing_never_reaches_classifier() {
        let classifier = Arc::new(StubClassifier::new(vec![0.9]));
        let orchestrator = PipelineOrchestrator::new(
            settings(8000),
            Arc::new(FailingExtractor { inner: FunctionalsExtractor::new(8000) }),
            classifier.clone(),
        )
        .unwrap();

        let harness = harness("recording.wav");
        write_tone(&harness.input, 8000, 3.0);
        let (result, events, _) = run(&orchestrator, harness, &CancellationToken::new());

        assert!(!result.success());
        assert!(result.message().unwrap().contains("No usable audio segments"));
        assert_eq!(percentages(&events), vec![20, 30, 50, 70]);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_corrupt_segment_abort_and_skip() {
        let root = tempfile::tempdir().unwrap();
        let input = root.path().join("input.wav");
        write_tone(&input, 8000, 3.0);

        for (policy, expect_abort) in [(DecodeFailurePolicy::Abort, true), (DecodeFailurePolicy::Skip, false)] {
            let mut settings = settings(8000);
            settings.window_seconds = 1.0;
            settings.decode_failure_policy = policy;
            let orchestrator = PipelineOrchestrator::new(
                settings,
                Arc::new(FunctionalsExtractor::new(8000)),
                Arc::new(StubClassifier::new(vec![0.1])),
            )
            .unwrap();

            let run_dir = tempfile::tempdir_in(root.path()).unwrap();
            let store = SegmentStore::create(run_dir.path()).unwrap();
            let ordinals = orchestrator.segment_stage(&input, &store).unwrap();
            std::fs::write(store.split_path(2), b"corrupted").unwrap();

            let cancel = CancellationToken::new();
            let outcome = orchestrator.resample_stage(&store, &ordinals, &cancel);
            if expect_abort {
                assert!(matches!(outcome, Err(PipelineError::Decode { ordinal: 2, .. })));
            } else {
                let kept = outcome.unwrap();
                assert_eq!(kept, vec![1, 3]);
                let table = orchestrator.extract_stage(&store, &kept, &cancel).unwrap();
                assert_eq!(table.labels(), &["segment_001", "segment_003"]);
                let probabilities = orchestrator.classify_stage(&table).unwrap();
                assert_eq!(probabilities.len(), 2);
            }
        }
    }

    #[test]
    fn test_cancelled_run_cleans_up() {
        let classifier = Arc::new(StubClassifier::new(vec![0.9]));
        let orchestrator = PipelineOrchestrator::new(
            settings(8000),
            Arc::new(FunctionalsExtractor::new(8000)),
            classifier.clone(),
        )
        .unwrap();

        let harness = harness("recording.wav");
        write_tone(&harness.input, 8000, 2.0);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (result, events, workspace_path) = run(&orchestrator, harness, &cancel);

        assert!(!result.success());
        assert_eq!(result.message(), Some("Analysis cancelled"));
        assert_eq!(percentages(&events), vec![20]);
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
        assert!(!workspace_path.exists());
    }

    #[test]
    fn test_schema_mismatch_rejected_at_construction() {
        let mismatched = StubClassifier {
            names: vec!["loudness_db_amean".to_string()],
            probabilities: vec![0.5],
            calls: AtomicUsize::new(0),
        };
        let result = PipelineOrchestrator::new(
            settings(8000),
            Arc::new(FunctionalsExtractor::new(8000)),
            Arc::new(mismatched),
        );
        assert!(matches!(result, Err(PipelineError::SchemaMismatch(_))));

        let result = PipelineOrchestrator::new(
            settings(16000),
            Arc::new(FunctionalsExtractor::new(8000)),
            Arc::new(StubClassifier::new(vec![0.5])),
        );
        assert!(matches!(result, Err(PipelineError::SchemaMismatch(_))));
    }

    #[test]
    fn test_feature_table_is_kept_when_configured() {
        let tables = tempfile::tempdir().unwrap();
        let mut settings = settings(8000);
        settings.window_seconds = 1.0;
        settings.feature_table_dir = Some(tables.path().to_path_buf());
        let orchestrator = PipelineOrchestrator::new(
            settings,
            Arc::new(FunctionalsExtractor::new(8000)),
            Arc::new(StubClassifier::new(vec![0.3])),
        )
        .unwrap();

        let harness = harness("recording.wav");
        write_tone(&harness.input, 8000, 2.0);
        let run_id = harness.workspace.run_id();
        let (result, _, _) = run(&orchestrator, harness, &CancellationToken::new());

        assert_eq!(result.label(), Some(Label::Negative));
        let kept = std::fs::read_to_string(tables.path().join(format!("{}.csv", run_id))).unwrap();
        assert!(kept.starts_with("segment,loudness_db_amean,"));
        assert_eq!(kept.lines().count(), 3);
    }
}
