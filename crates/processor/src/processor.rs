/*
 * The backup data processor.
 *
 * Splits assigned spans into range-sized requests, fans them out to a
 * memory-bounded pool of export workers, streams completed files to
 * external storage, and forwards progress to the coordinator. The first
 * fatal error from any worker cancels the rest.
 */

use crate::export::{build_export_request, send_export, KvExporter};
use crate::pool::reserve_worker_memory;
use crate::queue::{chunk_size_for, fill, WorkQueue};
use crate::retry::{classify, RetryPolicy, Verdict};
use crate::shutdown::CancelToken;
use crate::sink::{ExportedSpan, FileSink, SinkConf};
use crate::splitter::{split_request_spans, RangeOracle, SpanRequest};
use backup_common::{
    build_operator, parse_destination, BackupError, BoundAccount, ExportMetrics,
    ProcessorSettings, Result, Timestamp,
};
use backup_proto::{
    count_rows, BackupSpec, BulkProcessorProgress, CoordinatorMessage, ExportStatsSummary,
    FileMetadata, Locality, NodeContext, ProcessorProgress,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// How often the controller rolls up export statistics for the
/// coordinator.
const STATS_INTERVAL: std::time::Duration = std::time::Duration::from_secs(15);

pub struct BackupProcessor {
    spec: BackupSpec,
    node: NodeContext,
    settings: ProcessorSettings,
    kv: Arc<dyn KvExporter>,
    ranges: Arc<dyn RangeOracle>,
    memory: BoundAccount,
    metrics: Arc<ExportMetrics>,
}

impl BackupProcessor {
    pub fn new(
        spec: BackupSpec,
        node: NodeContext,
        settings: ProcessorSettings,
        kv: Arc<dyn KvExporter>,
        ranges: Arc<dyn RangeOracle>,
        memory: BoundAccount,
    ) -> Self {
        Self {
            spec,
            node,
            settings,
            kv,
            ranges,
            memory,
            metrics: Arc::new(ExportMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<ExportMetrics> {
        self.metrics.clone()
    }

    /// Runs the processor to completion, streaming progress and periodic
    /// statistics to `out`. Returns after every worker has drained, or
    /// with the first fatal error.
    pub async fn run(
        &self,
        cancel: CancelToken,
        out: mpsc::Sender<CoordinatorMessage>,
    ) -> Result<()> {
        let total_spans = self.spec.total_spans();
        let presplit = self.settings.presplit_request_spans;

        let mut request_spans: Vec<SpanRequest> = Vec::with_capacity(total_spans);
        // Introduced spans are new to this backup and export from time zero.
        split_request_spans(
            &self.spec.introduced_spans,
            Timestamp::EMPTY,
            self.spec.backup_start_time,
            presplit,
            self.ranges.as_ref(),
            &mut request_spans,
        )?;
        split_request_spans(
            &self.spec.spans,
            self.spec.backup_start_time,
            self.spec.backup_end_time,
            presplit,
            self.ranges.as_ref(),
            &mut request_spans,
        )?;

        info!(
            job_id = self.spec.job_id,
            spans = total_spans,
            ranges = request_spans.len(),
            "backup processor assigned spans"
        );

        let (dest_uri, locality_kv) = route_destination(
            &self.spec,
            &self.node.locality,
            self.settings.testing_discard_data,
        );
        let dest = parse_destination(&dest_uri)?;
        let storage = build_operator(&dest)?;

        let (workers, reservation) = reserve_worker_memory(&self.settings, &self.memory)?;
        info!(workers, "starting backup export workers");

        let queue = Arc::new(WorkQueue::with_span_capacity(request_spans.len()));
        let chunk_size = chunk_size_for(request_spans.len(), workers);
        fill(&queue, request_spans, chunk_size, presplit)?;

        let (progress_tx, mut progress_rx) = mpsc::channel::<ProcessorProgress>(workers);

        let mut tasks: JoinSet<Result<()>> = JoinSet::new();
        for _ in 0..workers {
            let sink = FileSink::new(
                SinkConf {
                    job_id: self.spec.job_id,
                    node_id: self.node.node_id,
                    prefix: dest.prefix.clone(),
                    target_file_size: self.settings.file_size,
                    write_chunk_size: self.settings.write_chunk_size,
                },
                storage.clone(),
                progress_tx.clone(),
            );
            let worker = ExportWorker {
                spec: self.spec.clone(),
                settings: self.settings.clone(),
                policy: RetryPolicy::from_settings(&self.settings),
                kv: self.kv.clone(),
                queue: queue.clone(),
                metrics: self.metrics.clone(),
                cancel: cancel.clone(),
                locality_kv: locality_kv.clone(),
                priority: false,
            };
            let worker_cancel = cancel.clone();
            tasks.spawn(async move {
                let result = worker.run(sink).await;
                if result.is_err() {
                    // Bring the peers down so the first fatal error
                    // surfaces promptly.
                    worker_cancel.cancel();
                }
                result
            });
        }
        drop(progress_tx);

        self.forward_progress(&mut progress_rx, &out, &cancel, total_spans)
            .await;

        // First fatal error wins; later ones are logged and dropped.
        let mut first_err: Option<BackupError> = None;
        while let Some(joined) = tasks.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => Err(BackupError::Unexpected(format!("worker panicked: {e}"))),
            };
            if let Err(e) = result {
                if first_err.is_none() {
                    cancel.cancel();
                    first_err = Some(e);
                } else {
                    debug!(error = %e, "dropping secondary worker error");
                }
            }
        }

        drop(reservation);
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Controller loop: forward worker progress to the coordinator with a
    /// completion fraction, and roll up export stats on a timer. Exits
    /// when the last worker drops its progress sender.
    async fn forward_progress(
        &self,
        progress_rx: &mut mpsc::Receiver<ProcessorProgress>,
        out: &mpsc::Sender<CoordinatorMessage>,
        cancel: &CancelToken,
        total_spans: usize,
    ) {
        let mut completed: u64 = 0;
        let mut ticker = tokio::time::interval(STATS_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; consume it so summaries start
        // one interval in.
        ticker.tick().await;

        loop {
            tokio::select! {
                progress = progress_rx.recv() => match progress {
                    Some(details) => {
                        completed += u64::from(details.completed_spans);
                        let mut completed_fraction = HashMap::new();
                        if total_spans > 0 {
                            completed_fraction.insert(
                                self.node.processor_id,
                                completed as f32 / total_spans as f32,
                            );
                        }
                        let msg = CoordinatorMessage::Progress(BulkProcessorProgress {
                            node_id: self.node.node_id,
                            flow_id: self.node.flow_id.clone(),
                            details,
                            completed_fraction,
                        });
                        if out.send(msg).await.is_err() {
                            // The coordinator went away; stop the workers.
                            cancel.cancel();
                        }
                    }
                    None => return,
                },
                _ = ticker.tick() => {
                    let msg = CoordinatorMessage::TraceSummary(ExportStatsSummary {
                        node_id: self.node.node_id,
                        flow_id: self.node.flow_id.clone(),
                        stats: self.metrics.snapshot(),
                    });
                    if out.send(msg).await.is_err() {
                        cancel.cancel();
                    }
                }
            }
        }
    }
}

/// Picks the destination URI and locality tag for this node.
pub(crate) fn route_destination(
    spec: &BackupSpec,
    locality: &Locality,
    discard: bool,
) -> (String, String) {
    let mut dest_uri = spec.default_uri.clone();
    let mut dest_locality = String::new();

    if !spec.uris_by_locality_kv.is_empty() {
        // More specific tiers take precedence, so search back to front.
        for tier in locality.tiers.iter().rev() {
            let kv = tier.to_string();
            if let Some(uri) = spec.uris_by_locality_kv.get(&kv) {
                info!(locality = %kv, "backing up spans to destination specified by locality");
                dest_uri = uri.clone();
                dest_locality = kv;
                break;
            }
        }
        if dest_locality.is_empty() {
            let node_localities: Vec<String> =
                locality.tiers.iter().map(|t| t.to_string()).collect();
            let backup_localities: Vec<&String> = spec.uris_by_locality_kv.keys().collect();
            info!(
                ?backup_localities,
                ?node_localities,
                "backing up spans to default locality because backup localities \
                 have no match in node's localities"
            );
        }
    }

    if discard {
        dest_uri = "null:///discard".to_string();
    }

    (dest_uri, dest_locality)
}

struct ExportWorker {
    spec: BackupSpec,
    settings: ProcessorSettings,
    policy: RetryPolicy,
    kv: Arc<dyn KvExporter>,
    queue: Arc<WorkQueue>,
    metrics: Arc<ExportMetrics>,
    cancel: CancelToken,
    locality_kv: String,
    /// Latched once any retried read falls behind the read-as-of time;
    /// sticky for the life of the worker.
    priority: bool,
}

impl ExportWorker {
    async fn run(mut self, mut sink: FileSink) -> Result<()> {
        let result = self.export_loop(&mut sink).await;
        match result {
            Ok(()) => sink.flush().await,
            Err(e) => {
                // Teardown flush is best effort; the primary error wins.
                if let Err(flush_err) = sink.flush().await {
                    warn!(error = %flush_err, "failed to flush backup sink during teardown");
                }
                Err(e)
            }
        }
    }

    async fn export_loop(&mut self, sink: &mut FileSink) -> Result<()> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(BackupError::Cancelled);
            }
            let Some(chunk) = self.queue.try_pop() else {
                // No work immediately available, so exit. A live peer may
                // still requeue a retry, but being live it will also be
                // around to pick it up.
                return Ok(());
            };
            for span in chunk {
                self.process_span(span, sink).await?;
            }
        }
    }

    /// Drives one span to completion, following resume spans until the
    /// store reports the request fully satisfied.
    async fn process_span(&mut self, request: SpanRequest, sink: &mut FileSink) -> Result<()> {
        let mut work = Some(request);
        while let Some(mut span) = work.take() {
            if self.cancel.is_cancelled() {
                return Err(BackupError::Cancelled);
            }

            // Re-attempts that are not yet in the priority regime wait out
            // the per-attempt delay, then check whether it is time to
            // switch over.
            if !self.priority && span.attempts > 0 {
                let delay = self.policy.delay_before_retry(span.last_tried);
                if !delay.is_zero() {
                    info!(
                        delay_ms = delay.as_millis() as u64,
                        attempt = span.attempts + 1,
                        "waiting to start attempt of remaining spans"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(BackupError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                self.priority = self.policy.should_escalate(self.spec.backup_end_time);
            }

            let request =
                build_export_request(&span, self.spec.mvcc_filter, &self.settings, self.priority);
            debug!(
                span = %span.span,
                attempt = span.attempts + 1,
                priority = self.priority,
                "sending export request"
            );

            let sent_at = Instant::now();
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => return Err(BackupError::Cancelled),
                result = send_export(
                    self.kv.as_ref(),
                    request,
                    self.settings.read_timeout,
                    self.settings.export_request_verbose_tracing,
                ) => result?,
            };

            let response = match outcome {
                Err(kv_err) => match classify(&kv_err) {
                    Verdict::Requeue => {
                        span.last_tried = Some(Instant::now());
                        span.attempts += 1;
                        self.metrics.record_retry();
                        debug!(
                            span = %span.span,
                            error = %kv_err,
                            "retrying export after lock conflict"
                        );
                        self.queue.push_retry(span)?;
                        continue;
                    }
                    Verdict::CompleteWithoutData => {
                        // The data below the GC threshold was excluded from
                        // the backup; the span still counts as complete.
                        let completed = u32::from(span.finishes_spec);
                        sink.write_with_no_data(completed).await?;
                        if completed > 0 {
                            self.metrics.record_span_completed();
                        }
                        continue;
                    }
                    Verdict::Fatal => {
                        return Err(BackupError::Export {
                            span: span.span.to_string(),
                            message: kv_err.to_string(),
                        });
                    }
                },
                Ok(response) => response,
            };

            // A resume span means the request was partially fulfilled and
            // the remainder picks up at the returned key.
            let resume = match &response.resume_span {
                Some(resume_span) if !resume_span.is_valid() => {
                    return Err(BackupError::InvalidResumeSpan(resume_span.to_string()));
                }
                Some(resume_span) => {
                    // The resume timestamp comes from the last file since
                    // files are always consecutive.
                    let resume_ts = response
                        .files
                        .last()
                        .map(|f| f.end_key_ts)
                        .unwrap_or_default();
                    Some(SpanRequest {
                        span: resume_span.clone(),
                        first_key_ts: resume_ts,
                        start: span.start,
                        end: span.end,
                        attempts: span.attempts,
                        last_tried: span.last_tried,
                        finishes_spec: span.finishes_spec,
                    })
                }
                None => None,
            };

            let completed_spans = u32::from(span.finishes_spec && resume.is_none());

            if response.files.len() > 1 {
                warn!(
                    files = response.files.len(),
                    "unexpected multi-file response using target_bytes = 1"
                );
            }

            // Even an export with no data reports the span for accurate
            // progress tracking.
            if response.files.is_empty() {
                sink.write_with_no_data(completed_spans).await?;
            }

            let file_count = response.files.len();
            let mut data_bytes: u64 = 0;
            for (i, file) in response.files.into_iter().enumerate() {
                data_bytes += file.sst.len() as u64;
                let entry_counts = count_rows(&file.exported, &self.spec.pk_ids);
                let mut metadata = FileMetadata {
                    span: file.span,
                    path: file.path,
                    entry_counts,
                    locality_kv: self.locality_kv.clone(),
                    start_time: None,
                    end_time: None,
                };
                // Spans exported over a non-default interval carry their
                // own time bounds.
                if span.start != self.spec.backup_start_time {
                    metadata.start_time = Some(span.start);
                    metadata.end_time = Some(span.end);
                }
                let exported = ExportedSpan {
                    metadata,
                    data: file.sst,
                    rev_start: response.start_time,
                    // Only the last file of a response completes the span.
                    completed_spans: if i + 1 == file_count { completed_spans } else { 0 },
                    at_key_boundary: file.end_key_ts.is_empty(),
                };
                sink.write(exported).await?;
            }

            self.metrics
                .record_export(file_count as u64, data_bytes, sent_at.elapsed());
            if completed_spans > 0 {
                self.metrics.record_span_completed();
            }

            work = resume;
        }
        Ok(())
    }
}
