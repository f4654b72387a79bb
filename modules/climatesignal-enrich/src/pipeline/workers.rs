//! Staged worker pool.
//!
//! One bounded channel sits between every pair of stages. Each stage runs N
//! tokio tasks that share the stage's receiver behind a mutex, so any idle
//! worker picks up the next record. Dedup always runs with one worker over
//! the single shared filter. Completed records and dead letters each drain
//! into their own sink task.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::try_join_all;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use climatesignal_common::{Record, WorkersConfig};

use super::{Enricher, Outcome, RunTotals, Step};
use crate::traits::{DeadLetter, DeadLetterSink, RecordSink};

type SharedReceiver<T> = Arc<Mutex<mpsc::Receiver<T>>>;

fn workers_for(config: &WorkersConfig, step: Step) -> usize {
    let n = match step {
        Step::Dedup => 1,
        Step::Clean => config.text,
        Step::Language => config.language,
        Step::Geo => config.geo,
        Step::Weather => config.weather,
        Step::Sentiment => config.sentiment,
    };
    n.max(1)
}

async fn next<T>(rx: &SharedReceiver<T>) -> Option<T> {
    rx.lock().await.recv().await
}

/// Route a record that left the pipeline early.
async fn divert(outcome: Outcome, dead_tx: &mpsc::Sender<DeadLetter>) {
    match outcome {
        Outcome::DeadLetter(letter) => {
            if dead_tx.send(letter).await.is_err() {
                warn!("Dead-letter channel closed");
            }
        }
        Outcome::Dropped { id, verdict } => {
            debug!(record_id = %id, verdict = verdict.as_str(), "Record dropped");
        }
        Outcome::Completed(record) => {
            warn!(record_id = %record.id, "Completed record diverted, discarding");
        }
    }
}

fn spawn_validators(
    enricher: &Arc<Enricher>,
    workers: usize,
    rx: SharedReceiver<String>,
    tx: mpsc::Sender<Record>,
    dead_tx: &mpsc::Sender<DeadLetter>,
) -> Vec<JoinHandle<()>> {
    (0..workers.max(1))
        .map(|_| {
            let enricher = enricher.clone();
            let rx = rx.clone();
            let tx = tx.clone();
            let dead_tx = dead_tx.clone();
            tokio::spawn(async move {
                while let Some(line) = next(&rx).await {
                    match enricher.validate(&line) {
                        Ok(record) => {
                            if tx.send(record).await.is_err() {
                                break;
                            }
                        }
                        Err(outcome) => divert(outcome, &dead_tx).await,
                    }
                }
            })
        })
        .collect()
}

fn spawn_stage(
    enricher: &Arc<Enricher>,
    step: Step,
    workers: usize,
    rx: SharedReceiver<Record>,
    tx: mpsc::Sender<Record>,
    dead_tx: &mpsc::Sender<DeadLetter>,
) -> Vec<JoinHandle<()>> {
    debug!(stage = step.name(), workers, "Starting stage workers");
    (0..workers)
        .map(|_| {
            let enricher = enricher.clone();
            let rx = rx.clone();
            let tx = tx.clone();
            let dead_tx = dead_tx.clone();
            tokio::spawn(async move {
                while let Some(record) = next(&rx).await {
                    match enricher.apply(step, record).await {
                        Ok(record) => {
                            if tx.send(record).await.is_err() {
                                break;
                            }
                        }
                        Err(outcome) => divert(outcome, &dead_tx).await,
                    }
                }
            })
        })
        .collect()
}

/// Read JSON lines from `input` and push them through the staged pool until
/// the input is exhausted and every stage has drained. Sinks are flushed
/// before returning.
pub async fn run_pool<R>(
    enricher: Arc<Enricher>,
    config: &WorkersConfig,
    input: R,
    sink: Arc<dyn RecordSink>,
    dead_sink: Arc<dyn DeadLetterSink>,
) -> Result<RunTotals>
where
    R: AsyncBufRead + Unpin,
{
    let capacity = config.channel_capacity.max(1);
    let (raw_tx, raw_rx) = mpsc::channel::<String>(capacity);
    let (dead_tx, mut dead_rx) = mpsc::channel::<DeadLetter>(capacity);

    let dead_task: JoinHandle<Result<u64>> = tokio::spawn(async move {
        let mut n = 0u64;
        while let Some(letter) = dead_rx.recv().await {
            dead_sink.reject(&letter).await?;
            n += 1;
        }
        dead_sink.flush().await?;
        Ok(n)
    });

    let mut handles = Vec::new();
    let (tx, mut rx) = mpsc::channel::<Record>(capacity);
    handles.extend(spawn_validators(
        &enricher,
        config.validate,
        Arc::new(Mutex::new(raw_rx)),
        tx,
        &dead_tx,
    ));

    for step in Step::ALL {
        let (next_tx, next_rx) = mpsc::channel::<Record>(capacity);
        handles.extend(spawn_stage(
            &enricher,
            step,
            workers_for(config, step),
            Arc::new(Mutex::new(rx)),
            next_tx,
            &dead_tx,
        ));
        rx = next_rx;
    }
    // Only workers hold senders from here on, so channels close as stages drain.
    drop(dead_tx);

    let mut out_rx = rx;
    let out_task: JoinHandle<Result<u64>> = tokio::spawn(async move {
        let mut n = 0u64;
        while let Some(record) = out_rx.recv().await {
            sink.write(&record).await?;
            n += 1;
        }
        sink.flush().await?;
        Ok(n)
    });

    let mut lines_read = 0u64;
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await.context("Failed to read input")? {
        if line.trim().is_empty() {
            continue;
        }
        lines_read += 1;
        if raw_tx.send(line).await.is_err() {
            warn!("Validator workers stopped early");
            break;
        }
    }
    drop(raw_tx);

    try_join_all(handles).await.context("Stage worker panicked")?;
    let completed = out_task.await.context("Record sink task panicked")??;
    let dead_lettered = dead_task.await.context("Dead-letter sink task panicked")??;

    let totals = RunTotals {
        lines_read,
        completed,
        dropped: lines_read.saturating_sub(completed + dead_lettered),
        dead_lettered,
    };
    info!(
        lines_read,
        completed, dead_lettered, dropped = totals.dropped, "Worker pool drained"
    );
    Ok(totals)
}

/// Single-task equivalent of `run_pool`, one record at a time.
pub async fn run_sequential<R>(
    enricher: &Enricher,
    input: R,
    sink: &dyn RecordSink,
    dead_sink: &dyn DeadLetterSink,
) -> Result<RunTotals>
where
    R: AsyncBufRead + Unpin,
{
    let mut totals = RunTotals::default();
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await.context("Failed to read input")? {
        if line.trim().is_empty() {
            continue;
        }
        totals.lines_read += 1;
        match enricher.process_line(&line).await {
            Outcome::Completed(record) => {
                sink.write(&record).await?;
                totals.completed += 1;
            }
            Outcome::Dropped { .. } => totals.dropped += 1,
            Outcome::DeadLetter(letter) => {
                dead_sink.reject(&letter).await?;
                totals.dead_lettered += 1;
            }
        }
    }
    sink.flush().await?;
    dead_sink.flush().await?;
    Ok(totals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{input_line, CollectingSink};

    fn input(lines: &[String]) -> std::io::Cursor<Vec<u8>> {
        std::io::Cursor::new(lines.join("\n").into_bytes())
    }

    #[test]
    fn dedup_always_gets_one_worker() {
        let config = WorkersConfig {
            dedup: 8,
            ..Default::default()
        };
        assert_eq!(workers_for(&config, Step::Dedup), 1);
        assert_eq!(workers_for(&config, Step::Weather), config.weather);
    }

    #[tokio::test]
    async fn pool_drains_all_records() {
        let lines: Vec<String> = (0..50)
            .map(|i| input_line(&i.to_string(), &format!("Record number {i} about the heat wave")))
            .collect();
        let sink = Arc::new(CollectingSink::new());
        let totals = run_pool(
            Arc::new(Enricher::default()),
            &WorkersConfig::default(),
            input(&lines),
            sink.clone(),
            sink.clone(),
        )
        .await
        .unwrap();

        assert_eq!(totals.lines_read, 50);
        assert_eq!(totals.completed, 50);
        assert_eq!(sink.records().len(), 50);
        assert_eq!(sink.flushes(), 2);
    }

    #[tokio::test]
    async fn pool_routes_duplicates_and_invalid_lines() {
        let lines = vec![
            input_line("1", "Storm surge warning for the coast"),
            input_line("1", "A different text with the same id"),
            input_line("2", "storm surge warning for the coast  "),
            "{not json".to_string(),
            String::new(),
        ];
        // One validator keeps arrival order at the dedup stage.
        let config = WorkersConfig {
            validate: 1,
            ..Default::default()
        };
        let sink = Arc::new(CollectingSink::new());
        let totals = run_pool(
            Arc::new(Enricher::default()),
            &config,
            input(&lines),
            sink.clone(),
            sink.clone(),
        )
        .await
        .unwrap();

        assert_eq!(totals.lines_read, 4);
        assert_eq!(totals.completed, 1);
        assert_eq!(totals.dead_lettered, 1);
        assert_eq!(totals.dropped, 2);
        assert_eq!(sink.letters()[0].stage, "parsed");
    }
}
