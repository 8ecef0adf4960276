use crate::error::Result;
use crate::pipeline::Pipeline;
use crate::report::FileOutcome;
use crate::upload::UploadedFile;
use async_stream::stream;
use futures::stream::FuturesUnordered;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

/// Progress events emitted by [`Pipeline::ingest_stream`].
///
/// Events follow a strict ordering:
/// 1. [`Started`](Self::Started): exactly once, after the workspace resolved.
/// 2. [`Processed`](Self::Processed): once per uploaded file, in completion
///    order (not upload order).
/// 3. [`Complete`](Self::Complete): exactly once, when every file is done.
///
/// If the workspace can't be resolved the stream yields a single `Err` and
/// ends. File failures never end the stream; they arrive as failed
/// [`FileOutcome`]s.
#[derive(Debug)]
pub enum IngestEvent {
    Started { files: usize },
    Processed(FileOutcome),
    Complete,
}

impl Pipeline {
    /// Streams [`IngestEvent`]s while the files of one upload are placed or
    /// extracted into the workspace for `project_id`.
    ///
    /// At most `concurrency` files are in flight at once; more are started
    /// as earlier ones finish, oldest first. Dropping the stream stops new
    /// files from starting, and cancelling `cancel` stops the ones already
    /// running at their next entry or chunk.
    pub fn ingest_stream<'a>(
        &'a self,
        project_id: &'a str,
        files: Vec<UploadedFile>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<IngestEvent>> + 'a {
        // `rustfmt` does not format macros that use braces. Wrap in parentheses!
        stream!({
            let workspace = match self.resolve(project_id).await {
                Ok(workspace) => workspace,
                Err(e) => {
                    yield Err(e);
                    return;
                },
            };
            yield Ok(IngestEvent::Started { files: files.len() });

            let mut pending: Vec<_> = files
                .into_iter()
                .enumerate()
                .map(|(index, file)| self.process(workspace.clone(), index, file, cancel.clone()))
                .collect();
            let mut processing = FuturesUnordered::new();
            processing.extend(pending.drain(..self.concurrency.min(pending.len())));
            while let Some(outcome) = processing.next().await {
                yield Ok(IngestEvent::Processed(outcome));
                // Pop-n-push, FIFO.
                if !pending.is_empty() {
                    processing.push(pending.remove(0));
                }
            }

            yield Ok(IngestEvent::Complete);
        })
    }
}
