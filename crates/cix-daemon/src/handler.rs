//! The driver's service object: owns the request queue, the database and
//! the scanner registry, and turns commands into responses.

use crate::error::DispatchError;
use cix_core::{DriverConfig, Metrics, PriorityQueue};
use cix_indexer::storage::{StagedUpdate, Zone};
use cix_indexer::{
    panic_message, to_cix, Database, IndexerError, MergePolicy, ScannerRegistry,
};
use cix_ipc::{Command, ErrorCode, RequestFrame, Response, ResponseData, ResponseFrame};
use std::io::Read;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Queue priority of nice-update chunks
pub const NICE_CHUNK_PRIORITY: u32 = 100;

/// Priority for queued commands without a default
const FALLBACK_PRIORITY: u32 = 50;

/// Queue key: request id plus chunk number, 0 for the request itself.
pub type JobKey = (u64, u32);

/// Work waiting in the queue.
pub enum Job {
    Request(RequestFrame),
    /// One chunk of a nice index rebuild
    UpdateChunk {
        zone: Arc<Zone>,
        staged: Arc<StagedUpdate>,
        chunk: usize,
    },
}

pub type JobQueue = PriorityQueue<JobKey, Job>;

/// Everything a request handler needs, constructed once at startup.
pub struct Engine {
    database: Database,
    queue: Arc<JobQueue>,
    metrics: Metrics,
    max_scan_bytes: usize,
    workers: usize,
}

impl Engine {
    pub fn new(config: &DriverConfig) -> Self {
        let registry = Arc::new(ScannerRegistry::with_defaults());
        let database = Database::new(config.db_root(), registry)
            .with_langlib_capacity(config.langlib_capacity);

        Self {
            database,
            queue: Arc::new(PriorityQueue::new()),
            metrics: Metrics::new(),
            max_scan_bytes: config.max_scan_bytes,
            workers: config.workers,
        }
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    fn registry(&self) -> &ScannerRegistry {
        self.database.registry()
    }

    /// Answer a command that never waits in the queue. `None` for commands
    /// that must be queued, and for `shutdown`, which the driver owns.
    pub fn handle_inline(&self, command: &Command) -> Option<Response> {
        let response = match command {
            Command::Ping => Response::ok_with(ResponseData::Pong {
                timestamp: chrono::Utc::now().timestamp(),
            }),
            Command::Status => Response::ok_with(self.status()),
            Command::Cancel { target } => {
                let cancelled = self.cancel(*target);
                debug!(target, cancelled, "Cancel");
                Response::ok_with(ResponseData::Cancelled { cancelled })
            }
            _ => return None,
        };
        Some(response)
    }

    /// Queue `frame`, replacing any queued work under the same id.
    pub fn submit(&self, frame: RequestFrame) -> Result<(), DispatchError> {
        let id = frame.id;
        let priority = frame
            .priority
            .or_else(|| frame.command.default_priority())
            .unwrap_or(FALLBACK_PRIORITY);

        // Leftover chunks of an earlier request with this id
        self.queue.remove_matching(|(request, chunk)| *request == id && *chunk != 0);

        debug!(id, priority, command = frame.command.name(), "Queued");
        if self.queue.put(priority, (id, 0), Job::Request(frame)) {
            Ok(())
        } else {
            Err(DispatchError::ShuttingDown)
        }
    }

    /// Drop queued work for request `target`, including update chunks.
    pub fn cancel(&self, target: u64) -> bool {
        self.queue.remove_matching(|(request, _)| *request == target) > 0
    }

    pub fn status(&self) -> ResponseData {
        ResponseData::Status {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: self.metrics.uptime_secs(),
            queue_depth: self.queue.len(),
            zones_loaded: self.database.loaded_zones(),
            workers: self.workers,
            requests_total: self.metrics.requests(),
            requests_failed: self.metrics.failures(),
            avg_latency_ms: self.metrics.avg_latency().as_millis() as u64,
        }
    }

    /// Run one queued job on the calling worker thread.
    ///
    /// Panics and errors become an error response for the originating
    /// request. `None` when the job has nothing to report yet.
    pub fn run_job(&self, key: JobKey, job: Job) -> Option<ResponseFrame> {
        let (id, _) = key;
        self.answer(id, || self.execute(id, job))
    }

    fn answer<F>(&self, id: u64, work: F) -> Option<ResponseFrame>
    where
        F: FnOnce() -> Result<Option<Response>, DispatchError>,
    {
        let started = Instant::now();

        let result = panic::catch_unwind(AssertUnwindSafe(work))
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                error!(id, message = %message, "Request handler panicked");
                Ok(Some(Response::error(ErrorCode::InternalError, message)))
            });

        let response = match result {
            Ok(Some(response)) => response,
            Ok(None) => return None,
            Err(e) => {
                warn!(id, error = %e, "Request failed");
                Response::error(e.code(), e.to_string())
            }
        };
        self.record(started, &response);
        Some(ResponseFrame::new(id, response))
    }

    /// Count an answered request.
    pub fn record(&self, started: Instant, response: &Response) {
        self.metrics
            .record_request(started.elapsed(), response.is_error());
    }

    fn execute(&self, id: u64, job: Job) -> Result<Option<Response>, DispatchError> {
        match job {
            Job::Request(frame) => self.execute_command(id, frame.command),
            Job::UpdateChunk {
                zone,
                staged,
                chunk,
            } => Self::run_chunk(&zone, &staged, chunk),
        }
    }

    fn execute_command(&self, id: u64, command: Command) -> Result<Option<Response>, DispatchError> {
        let data = match command {
            Command::Scan {
                path,
                content,
                language,
                project,
            } => self.scan(&path, content, language.as_deref(), project.as_deref())?,

            Command::UpdateIndex { project, nice } => {
                let zone = self.database.zone(&project)?;
                if nice {
                    return self.schedule_update(id, zone);
                }
                ResponseData::IndexUpdated {
                    stats: zone.update(false)?,
                }
            }

            Command::GetCompletions {
                project,
                language,
                expr,
                prefix,
            } => {
                let zone = self.database.zone(&project)?;
                ResponseData::Completions {
                    items: zone.completions(&language, &expr, &prefix)?,
                }
            }

            Command::GetDefinition {
                project,
                language,
                expr,
            } => {
                let zone = self.database.zone(&project)?;
                ResponseData::Definition {
                    definition: zone.definition(&language, &expr)?,
                }
            }

            Command::GetBlob {
                project,
                language,
                name,
            } => {
                let zone = self.database.zone(&project)?;
                let blob = zone.try_get_blob(&language, &name)?;
                ResponseData::Blob {
                    cix: blob.map(|node| to_cix(&node)),
                }
            }

            Command::SaveIndex { project } => {
                let zone = self.database.zone(&project)?;
                ResponseData::Saved {
                    saved: zone.save()?,
                }
            }

            other => {
                return match self.handle_inline(&other) {
                    Some(response) => Ok(Some(response)),
                    None => Err(DispatchError::InvalidRequest(format!(
                        "{} cannot be queued",
                        other.name()
                    ))),
                }
            }
        };
        Ok(Some(Response::ok_with(data)))
    }

    fn scan(
        &self,
        path: &Path,
        content: Option<String>,
        language: Option<&str>,
        project: Option<&Path>,
    ) -> Result<ResponseData, DispatchError> {
        let path = match project {
            Some(project) if path.is_relative() => project.join(path),
            _ => path.to_path_buf(),
        };

        let content = match content {
            Some(content) => {
                self.check_scan_size(&path, content.len())?;
                content
            }
            None => self.read_source(&path)?,
        };

        let registry = self.registry();
        let language = match language {
            Some(name) => registry
                .get(name)
                .map(|scanner| scanner.language())
                .ok_or_else(|| IndexerError::UnsupportedLanguage(name.to_string()))?,
            None => registry.detect(&path, &content).ok_or_else(|| {
                IndexerError::UnsupportedLanguage(format!(
                    "cannot detect language of {}",
                    path.display()
                ))
            })?,
        };

        let output = registry.try_scan(&content, &path, language)?;
        let cix = to_cix(&output.tree);

        if let Some(project) = project {
            let zone = self.database.zone(project)?;
            let absolute = absolute_in(zone.project(), &path);
            zone.absorb(language, &absolute, &content, output.tree, MergePolicy::WholeFile)?;
        }

        Ok(ResponseData::Scan {
            language: language.to_string(),
            cix,
            errors: output.errors,
        })
    }

    fn check_scan_size(&self, path: &Path, len: usize) -> Result<(), DispatchError> {
        if len > self.max_scan_bytes {
            return Err(DispatchError::ResourceExhausted(format!(
                "{} is {} bytes, limit is {}",
                path.display(),
                len,
                self.max_scan_bytes
            )));
        }
        Ok(())
    }

    /// Read a source file, failing this request alone when it is over the
    /// limit or its buffer cannot be allocated.
    fn read_source(&self, path: &Path) -> Result<String, DispatchError> {
        let len = std::fs::metadata(path)?.len() as usize;
        self.check_scan_size(path, len)?;

        let mut bytes = Vec::new();
        bytes.try_reserve_exact(len).map_err(|e| {
            DispatchError::ResourceExhausted(format!("{}: {}", path.display(), e))
        })?;
        std::fs::File::open(path)?.read_to_end(&mut bytes)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Split a nice rebuild into low-priority chunks. The last chunk to
    /// finish answers request `id`.
    fn schedule_update(&self, id: u64, zone: Arc<Zone>) -> Result<Option<Response>, DispatchError> {
        let staged = zone.begin_update(true)?;
        let chunks = staged.chunks().len();
        debug!(id, chunks, project = %zone.project().display(), "Scheduling nice update");

        let mut answer = None;
        for chunk in 0..chunks {
            let job = Job::UpdateChunk {
                zone: zone.clone(),
                staged: staged.clone(),
                chunk,
            };
            if !self.queue.put(NICE_CHUNK_PRIORITY, (id, chunk as u32 + 1), job) {
                // Closed for shutdown: finish inline
                if let Some(response) = Self::run_chunk(&zone, &staged, chunk)? {
                    answer = Some(response);
                }
            }
        }
        Ok(answer)
    }

    fn run_chunk(
        zone: &Zone,
        staged: &StagedUpdate,
        chunk: usize,
    ) -> Result<Option<Response>, DispatchError> {
        Ok(zone
            .run_update_chunk(staged, chunk)?
            .map(|stats| Response::ok_with(ResponseData::IndexUpdated { stats })))
    }
}

/// `path` made absolute against the canonical project root.
fn absolute_in(project: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
    } else {
        project.join(path)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("database", &self.database)
            .field("queue", &self.queue)
            .field("workers", &self.workers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cix_indexer::from_cix;
    use tempfile::tempdir;

    fn engine(db: &Path) -> Engine {
        let config = DriverConfig {
            db_base_dir: db.to_path_buf(),
            workers: 1,
            max_scan_bytes: 1024,
            ..Default::default()
        };
        Engine::new(&config)
    }

    fn run(engine: &Engine, id: u64, command: Command) -> Response {
        engine
            .run_job((id, 0), Job::Request(RequestFrame::new(id, command)))
            .expect("response")
            .response
    }

    fn drain(engine: &Engine) -> Vec<ResponseFrame> {
        std::iter::from_fn(|| engine.queue().try_get())
            .filter_map(|(key, job)| engine.run_job(key, job))
            .collect()
    }

    #[test]
    fn test_panicking_job_becomes_internal_error() {
        let db = tempdir().unwrap();
        let engine = engine(db.path());

        let frame = engine
            .answer(7, || panic!("scanner blew up on line {}", 3))
            .expect("response");
        assert_eq!(frame.id, 7);
        assert_eq!(
            frame.response,
            Response::error(ErrorCode::InternalError, "scanner blew up on line 3")
        );

        // The engine keeps serving and counts the failure.
        match engine.status() {
            ResponseData::Status { requests_failed, .. } => assert_eq!(requests_failed, 1),
            other => panic!("unexpected {:?}", other),
        }
        assert!(engine.handle_inline(&Command::Ping).is_some());
    }

    #[test]
    fn test_scan_buffer() {
        let db = tempdir().unwrap();
        let engine = engine(db.path());

        let response = run(
            &engine,
            1,
            Command::Scan {
                path: "m.py".into(),
                content: Some("def foo(x): pass\n".into()),
                language: None,
                project: None,
            },
        );
        let (language, cix, errors) = match response {
            Response::Ok {
                data: Some(ResponseData::Scan { language, cix, errors }),
            } => (language, cix, errors),
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(language, "Python");
        assert!(errors.is_empty());
        assert!(from_cix(&cix).unwrap().child("foo").is_some());
    }

    #[test]
    fn test_scan_limits_and_languages() {
        let db = tempdir().unwrap();
        let engine = engine(db.path());

        let big = run(
            &engine,
            1,
            Command::Scan {
                path: "big.py".into(),
                content: Some("x = 1\n".repeat(500)),
                language: None,
                project: None,
            },
        );
        assert!(matches!(
            big,
            Response::Error {
                code: ErrorCode::ResourceExhausted,
                ..
            }
        ));

        let unknown = run(
            &engine,
            2,
            Command::Scan {
                path: "a.cob".into(),
                content: Some("IDENTIFICATION DIVISION.".into()),
                language: None,
                project: None,
            },
        );
        assert!(matches!(
            unknown,
            Response::Error {
                code: ErrorCode::UnsupportedLanguage,
                ..
            }
        ));

        let missing = run(
            &engine,
            3,
            Command::Scan {
                path: db.path().join("absent.py"),
                content: None,
                language: None,
                project: None,
            },
        );
        assert!(matches!(
            missing,
            Response::Error {
                code: ErrorCode::NotFound,
                ..
            }
        ));
        assert_eq!(engine.metrics().failures(), 3);
    }

    #[test]
    fn test_resubmission_replaces_and_cancel_removes() {
        let db = tempdir().unwrap();
        let engine = engine(db.path());

        engine
            .submit(RequestFrame::new(1, Command::SaveIndex { project: "/a".into() }))
            .unwrap();
        engine
            .submit(RequestFrame::new(1, Command::SaveIndex { project: "/b".into() }))
            .unwrap();
        assert_eq!(engine.queue().len(), 1);

        assert!(engine.cancel(1));
        assert!(!engine.cancel(1));
        assert!(engine.queue().is_empty());
    }

    #[test]
    fn test_nice_update_answers_once() {
        let db = tempdir().unwrap();
        let project = tempdir().unwrap();
        std::fs::create_dir_all(project.path().join("pkg")).unwrap();
        std::fs::create_dir_all(project.path().join("lib")).unwrap();
        std::fs::write(project.path().join("top.py"), "x = 1\n").unwrap();
        std::fs::write(project.path().join("pkg/a.py"), "def a(): pass\n").unwrap();
        std::fs::write(project.path().join("lib/b.py"), "def b(): pass\n").unwrap();
        let engine = engine(db.path());

        engine
            .submit(RequestFrame::new(
                9,
                Command::UpdateIndex {
                    project: project.path().to_path_buf(),
                    nice: true,
                },
            ))
            .unwrap();

        let responses = drain(&engine);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].id, 9);
        let Response::Ok {
            data: Some(ResponseData::IndexUpdated { stats }),
        } = &responses[0].response
        else {
            panic!("unexpected {:?}", responses[0]);
        };
        assert_eq!(stats.files, 3);
        assert_eq!(stats.chunks, 3);
    }

    #[test]
    fn test_inline_commands() {
        let db = tempdir().unwrap();
        let engine = engine(db.path());

        let pong = engine.handle_inline(&Command::Ping).unwrap();
        assert!(matches!(
            pong,
            Response::Ok {
                data: Some(ResponseData::Pong { .. })
            }
        ));
        let status = engine.handle_inline(&Command::Status).unwrap();
        assert!(matches!(
            status,
            Response::Ok {
                data: Some(ResponseData::Status { workers: 1, .. })
            }
        ));
        assert!(engine.handle_inline(&Command::Shutdown).is_none());
        assert!(engine
            .handle_inline(&Command::SaveIndex {
                project: "/p".into()
            })
            .is_none());

        // A queued inline command is still answered.
        let cancel = run(&engine, 5, Command::Cancel { target: 77 });
        assert_eq!(
            cancel,
            Response::ok_with(ResponseData::Cancelled { cancelled: false })
        );
    }
}
