use crate::reader::{create_session_channels, spawn_reader_thread, ReaderThreadContext};
use portable_pty::{native_pty_system, Child, MasterPty, PtySize};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

pub struct PtySession {
    pub id: Uuid,
    pub child_pid: Option<u32>,
    master: Arc<Mutex<Box<dyn MasterPty + Send>>>,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    child: Arc<std::sync::Mutex<Box<dyn Child + Send + Sync>>>,
    output_tx: broadcast::Sender<Vec<u8>>,
    exit_tx: broadcast::Sender<Option<u32>>,
    // std::sync::atomic is used here instead of tokio::sync because `is_stopped()` is called
    // from both sync and async contexts (including the reader thread).
    stopped: Arc<std::sync::atomic::AtomicBool>,
}

impl PtySession {
    pub fn spawn(
        session_id: Uuid,
        program: &str,
        args: &[&str],
        working_dir: &Path,
        env: Vec<(String, String)>,
        cols: u16,
        rows: u16,
    ) -> Result<Self, crate::PtyError> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| crate::PtyError::Pty(e.to_string()))?;

        let mut cmd = portable_pty::CommandBuilder::new(program);
        cmd.args(args);
        cmd.cwd(working_dir);
        for (key, value) in env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| crate::PtyError::Pty(e.to_string()))?;

        let channels = create_session_channels();

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| crate::PtyError::Pty(e.to_string()))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| crate::PtyError::Pty(e.to_string()))?;

        let child_pid = child.process_id();
        let child_arc = Arc::new(std::sync::Mutex::new(child));

        spawn_reader_thread(ReaderThreadContext {
            reader,
            output_tx: channels.output_tx.clone(),
            exit_tx: channels.exit_tx.clone(),
            stopped: channels.stopped.clone(),
            child: child_arc.clone(),
            session_id,
        });

        tracing::info!(session_id = %session_id, program, "PTY session spawned");

        Ok(Self {
            id: session_id,
            child_pid,
            master: Arc::new(Mutex::new(pair.master)),
            writer: Arc::new(Mutex::new(writer)),
            child: child_arc,
            output_tx: channels.output_tx,
            exit_tx: channels.exit_tx,
            stopped: channels.stopped,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
        self.output_tx.subscribe()
    }

    pub fn subscribe_exit(&self) -> broadcast::Receiver<Option<u32>> {
        self.exit_tx.subscribe()
    }

    pub async fn write(&self, data: &[u8]) -> Result<(), crate::PtyError> {
        tracing::trace!(session_id = %self.id, len = data.len(), "writing to PTY");
        let mut writer = self.writer.lock().await;
        writer.write_all(data)?;
        Ok(())
    }

    pub async fn resize(&self, cols: u16, rows: u16) -> Result<(), crate::PtyError> {
        tracing::debug!(session_id = %self.id, cols, rows, "resizing PTY");
        let master = self.master.lock().await;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| crate::PtyError::Pty(e.to_string()))?;
        Ok(())
    }

    /// Asks the child process to terminate cleanly (SIGINT on unix).
    pub fn interrupt(&self) {
        #[cfg(unix)]
        if let Some(pid) = self.child_pid {
            tracing::debug!(session_id = %self.id, pid, "interrupting PTY child");
            unsafe {
                libc::kill(pid as i32, libc::SIGINT);
            }
        }
    }

    pub async fn kill(&self) -> Result<(), crate::PtyError> {
        if self.is_stopped() {
            return Ok(());
        }

        tracing::info!(session_id = %self.id, "killing PTY session");

        {
            let mut child = self.child.lock().unwrap_or_else(|e| e.into_inner());
            child
                .kill()
                .map_err(|e| crate::PtyError::Pty(e.to_string()))?;
        }

        self.stopped
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let _ = self.exit_tx.send(None);
        Ok(())
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(std::sync::atomic::Ordering::SeqCst)
    }
}
