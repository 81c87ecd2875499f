use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, warn};

use crate::extractor::PageExtraction;
use crate::ocr::{recover_text, OcrEngine};

/// Bounded set of OCR threads sharing one character budget.
///
/// Each worker checks the budget before starting an image, so at most one
/// image per worker runs after the budget is spent.
pub struct OcrPool {
    engine: Arc<dyn OcrEngine>,
    workers: usize,
    language: String,
}

pub(crate) struct OcrOutput {
    /// Recognized texts in page order, then image order within a page.
    pub texts: Vec<String>,
    pub invocations: usize,
}

struct OcrJob<'a> {
    page: usize,
    index: usize,
    page_number: u32,
    image: &'a [u8],
}

struct Budget {
    used: AtomicUsize,
    max: usize,
}

impl Budget {
    fn exhausted(&self) -> bool {
        self.used.load(Ordering::SeqCst) > self.max
    }
}

impl OcrPool {
    pub fn new(engine: Arc<dyn OcrEngine>, workers: usize, language: String) -> Self {
        Self {
            engine,
            workers: workers.max(1),
            language,
        }
    }

    pub(crate) fn run(&self, pages: &[PageExtraction], already_used: usize, max: usize) -> OcrOutput {
        let jobs: Vec<OcrJob<'_>> = pages
            .iter()
            .enumerate()
            .flat_map(|(page, p)| {
                p.images.iter().enumerate().map(move |(index, image)| OcrJob {
                    page,
                    index,
                    page_number: p.page_number,
                    image: image.as_slice(),
                })
            })
            .collect();

        let budget = Budget {
            used: AtomicUsize::new(already_used),
            max,
        };
        if jobs.is_empty() || budget.exhausted() {
            return OcrOutput {
                texts: Vec::new(),
                invocations: 0,
            };
        }

        let worker_count = self.workers.min(jobs.len());
        let invocations = AtomicUsize::new(0);
        let (job_tx, job_rx) = bounded::<OcrJob<'_>>(worker_count * 2);
        let (result_tx, result_rx) = unbounded::<(usize, usize, String)>();

        debug!("Running OCR over {} images with {} workers", jobs.len(), worker_count);

        thread::scope(|s| {
            for worker_id in 0..worker_count {
                let ctx = WorkerCtx {
                    worker_id,
                    engine: self.engine.as_ref(),
                    language: &self.language,
                    budget: &budget,
                    invocations: &invocations,
                };
                let rx = job_rx.clone();
                let tx = result_tx.clone();
                s.spawn(move || run_worker(ctx, rx, tx));
            }
            drop(result_tx);

            for job in jobs {
                if budget.exhausted() {
                    break;
                }
                if job_tx.send(job).is_err() {
                    break;
                }
            }
            drop(job_tx);
        });

        let mut results: Vec<(usize, usize, String)> = result_rx.iter().collect();
        results.sort_by_key(|(page, index, _)| (*page, *index));

        OcrOutput {
            texts: results.into_iter().map(|(_, _, text)| text).collect(),
            invocations: invocations.load(Ordering::SeqCst),
        }
    }
}

struct WorkerCtx<'a> {
    worker_id: usize,
    engine: &'a dyn OcrEngine,
    language: &'a str,
    budget: &'a Budget,
    invocations: &'a AtomicUsize,
}

fn run_worker(
    ctx: WorkerCtx<'_>,
    jobs: Receiver<OcrJob<'_>>,
    results: Sender<(usize, usize, String)>,
) {
    for job in jobs.iter() {
        if ctx.budget.exhausted() {
            continue;
        }

        ctx.invocations.fetch_add(1, Ordering::SeqCst);
        match recover_text(ctx.engine, job.image, ctx.language) {
            Ok(text) if text.is_empty() => {}
            Ok(text) => {
                ctx.budget
                    .used
                    .fetch_add(text.chars().count(), Ordering::SeqCst);
                if results.send((job.page, job.index, text)).is_err() {
                    break;
                }
            }
            Err(e) => warn!(
                worker = ctx.worker_id,
                page = job.page_number,
                image = job.index + 1,
                "OCR failed, skipping image: {}",
                e
            ),
        }
    }
}
