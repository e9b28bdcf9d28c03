//! Pull-based result streaming.
//!
//! A [`BatchStream`] owns a planned [`QueryExecution`] and does nothing until
//! it is first polled. The first poll moves the execution onto the blocking
//! pool, where a producer pushes batches into a bounded channel; each
//! `next()` receives one. Dropping the stream closes the channel, the
//! producer's next send fails, and the execution (with its table cursor) is
//! dropped on the producer thread.

use crate::join_error;
use futures::Stream;
use lakevec_core::config;
use lakevec_core::query::QueryExecution;
use lakevec_core::table::{RecordBatch, Schema};
use lakevec_core::Result;
use std::future::{poll_fn, Future};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

enum State {
    /// Not yet polled.
    Idle(Option<QueryExecution>),
    Running {
        rx: mpsc::Receiver<Result<RecordBatch>>,
        producer: JoinHandle<()>,
    },
    Done,
}

/// Async sequence of result batches in global result order.
///
/// Batches already yielded are never retracted. A mid-scan failure is yielded
/// once as `Err` and ends the stream.
pub struct BatchStream {
    schema: Schema,
    state: State,
}

impl BatchStream {
    pub fn new(execution: QueryExecution) -> Self {
        Self {
            schema: execution.schema().clone(),
            state: State::Idle(Some(execution)),
        }
    }

    /// Schema of every batch this stream yields.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Receive the next batch, `Ok(None)` at end of stream.
    pub async fn next(&mut self) -> Result<Option<RecordBatch>> {
        poll_fn(|cx| self.poll_batch(cx)).await.transpose()
    }

    /// Drain the stream.
    pub async fn try_collect(mut self) -> Result<Vec<RecordBatch>> {
        let mut batches = Vec::new();
        while let Some(batch) = self.next().await? {
            batches.push(batch);
        }
        Ok(batches)
    }

    /// Stop the query early. Dropping the stream has the same effect.
    pub fn close(&mut self) {
        if !self.is_finished() {
            tracing::debug!("Result stream closed before exhaustion");
        }
        self.state = State::Done;
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, State::Done)
    }

    fn poll_batch(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<RecordBatch>>> {
        loop {
            match &mut self.state {
                State::Idle(execution) => {
                    self.state = match execution.take() {
                        Some(execution) => start(execution),
                        None => State::Done,
                    };
                }
                State::Running { rx, producer } => {
                    return match rx.poll_recv(cx) {
                        Poll::Ready(Some(item)) => Poll::Ready(Some(item)),
                        Poll::Ready(None) => {
                            // Channel closed: the producer has returned or panicked.
                            let joined = match Pin::new(producer).poll(cx) {
                                Poll::Ready(joined) => joined,
                                Poll::Pending => return Poll::Pending,
                            };
                            self.state = State::Done;
                            Poll::Ready(joined.err().map(|e| Err(join_error(e))))
                        }
                        Poll::Pending => Poll::Pending,
                    };
                }
                State::Done => return Poll::Ready(None),
            }
        }
    }
}

impl Stream for BatchStream {
    type Item = Result<RecordBatch>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_batch(cx)
    }
}

impl Drop for BatchStream {
    fn drop(&mut self) {
        if matches!(self.state, State::Running { .. }) {
            tracing::debug!("Result stream dropped before exhaustion");
        }
    }
}

impl std::fmt::Debug for BatchStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            State::Idle(_) => "idle",
            State::Running { .. } => "running",
            State::Done => "done",
        };
        f.debug_struct("BatchStream")
            .field("schema", &self.schema)
            .field("state", &state)
            .finish()
    }
}

fn start(execution: QueryExecution) -> State {
    let (tx, rx) = mpsc::channel(config::STREAM_CHANNEL_CAPACITY);
    let producer = tokio::task::spawn_blocking(move || produce(execution, tx));
    State::Running { rx, producer }
}

/// Runs on the blocking pool. Returns when the execution is exhausted or
/// failed, or when the consumer has gone away.
fn produce(execution: QueryExecution, tx: mpsc::Sender<Result<RecordBatch>>) {
    for item in execution {
        if tx.blocking_send(item).is_err() {
            tracing::debug!("Result consumer gone; stopping query");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use lakevec_core::index::IndexStore;
    use lakevec_core::query::{QueryPlan, QuerySpec};
    use lakevec_core::table::{ColumnData, DataSource, DataType, Field, MemTable};
    use std::sync::Arc;
    use std::time::Duration;

    fn table(n: usize) -> MemTable {
        let schema = Schema::try_new(vec![
            Field::new("id", DataType::Int64),
            Field::new("vec", DataType::Vector(2)),
        ])
        .unwrap();
        let t = MemTable::new("t", schema.clone());
        let values: Vec<f32> = (0..n).flat_map(|i| [i as f32, 0.0]).collect();
        let batch = RecordBatch::try_new(
            schema,
            vec![
                ColumnData::Int64((0..n as i64).collect()),
                ColumnData::Vector { dim: 2, values },
            ],
        )
        .unwrap();
        t.append(batch).unwrap();
        t
    }

    fn stream(t: &MemTable, spec: QuerySpec) -> BatchStream {
        let source: Arc<dyn DataSource> = t.snapshot();
        let plan = QueryPlan::new(spec, source, &IndexStore::new()).unwrap();
        BatchStream::new(plan.execute())
    }

    async fn wait_for_cursors(t: &MemTable, expected: usize) {
        for _ in 0..200 {
            if t.open_cursors() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("open cursors stayed at {}", t.open_cursors());
    }

    #[tokio::test]
    async fn test_yields_batches_in_distance_order() {
        let t = table(25);
        let spec = QuerySpec::builder()
            .nearest_to(vec![0.0, 0.0])
            .limit(25)
            .batch_size(10)
            .build()
            .unwrap();
        let batches = stream(&t, spec).try_collect().await.unwrap();
        let sizes: Vec<usize> = batches.iter().map(|b| b.num_rows()).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
        let ids: Vec<u64> = batches.iter().flat_map(|b| b.row_ids().to_vec()).collect();
        assert_eq!(ids, (0..25).collect::<Vec<u64>>());
        wait_for_cursors(&t, 0).await;
    }

    #[tokio::test]
    async fn test_drop_before_first_poll_releases_cursor() {
        let t = table(5);
        let s = stream(&t, QuerySpec::builder().build().unwrap());
        assert_eq!(t.open_cursors(), 1);
        drop(s);
        assert_eq!(t.open_cursors(), 0);
    }

    #[tokio::test]
    async fn test_drop_mid_stream_stops_producer() {
        let t = table(100);
        let spec = QuerySpec::builder().limit(100).batch_size(10).build().unwrap();
        let mut s = stream(&t, spec);
        let first = s.next().await.unwrap().unwrap();
        assert_eq!(first.num_rows(), 10);
        drop(s);
        wait_for_cursors(&t, 0).await;
    }

    #[tokio::test]
    async fn test_close_ends_stream() {
        let t = table(30);
        let spec = QuerySpec::builder().limit(30).batch_size(10).build().unwrap();
        let mut s = stream(&t, spec);
        assert!(s.next().await.unwrap().is_some());
        s.close();
        assert!(s.is_finished());
        assert!(s.next().await.unwrap().is_none());
        wait_for_cursors(&t, 0).await;
    }

    #[tokio::test]
    async fn test_futures_stream_impl() {
        let t = table(12);
        let spec = QuerySpec::builder().limit(12).batch_size(5).build().unwrap();
        let s = stream(&t, spec);
        assert_eq!(s.schema().column_names(), vec!["id", "vec"]);
        let rows: usize = s.map(|b| b.unwrap().num_rows()).fold(0, |a, n| async move { a + n }).await;
        assert_eq!(rows, 12);
    }
}
