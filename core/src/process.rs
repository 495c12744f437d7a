use std::fmt::{Debug, Formatter};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::warn;

use crate::errors::FoghornErrors;

#[allow(unused_imports)]
use crate::scheduler::Scheduler;

/// [`ProcessSupervisor`] spawns catalog processes as operating-system children. A command
/// vector is executed directly (argv[0] resolved through the host's PATH), there is no
/// shell interpretation of any element
///
/// The supervisor never retries a failed spawn; retry policy belongs to the caller. The
/// returned [`ProcessHandle`] is the only way the child is observed afterwards
///
/// # See Also
/// - [`ProcessHandle`]
/// - [`Scheduler`]
#[derive(Debug, Default)]
pub struct ProcessSupervisor;

impl ProcessSupervisor {
    /// Creates / Constructs a new [`ProcessSupervisor`] instance
    pub fn new() -> Self {
        Self
    }

    /// Spawns a child process from a command vector
    ///
    /// # Argument(s)
    /// This method accepts the catalog ``process_name`` (used only for error context)
    /// and the ``argv`` command vector, which must be non-empty
    ///
    /// # Returns
    /// A [`ProcessHandle`] tracking the live child, or [`FoghornErrors::EmptyCommand`] /
    /// [`FoghornErrors::Spawn`] when there is nothing to execute or the operating system
    /// refuses the spawn
    ///
    /// # See Also
    /// - [`ProcessHandle`]
    pub fn spawn(&self, process_name: &str, argv: &[String]) -> Result<ProcessHandle, FoghornErrors> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| FoghornErrors::EmptyCommand(process_name.to_string()))?;

        let child = Command::new(program)
            .args(args)
            .spawn()
            .map_err(|source| FoghornErrors::Spawn {
                process_name: process_name.to_string(),
                argv: argv.to_vec(),
                source,
            })?;

        let pid = child.id();
        Ok(ProcessHandle {
            pid,
            child: Mutex::new(Some(child)),
        })
    }
}

/// [`ProcessHandle`] is the supervisor's view of one live child process: a stable pid,
/// a wait that resolves to the exit code once the child has been reaped, and a graceful
/// termination signal
///
/// # See Also
/// - [`ProcessSupervisor`]
pub struct ProcessHandle {
    pid: Option<u32>,
    child: Mutex<Option<Child>>,
}

impl Debug for ProcessHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle").field("pid", &self.pid).finish()
    }
}

impl ProcessHandle {
    /// The operating-system process id of the child, or ``None`` when the runtime
    /// no longer knows it (the child has already been reaped)
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Waits for the child to terminate and be reaped
    ///
    /// # Returns
    /// The exit code of the child, stable once observed. ``None`` when the child was
    /// killed by a signal, or when the child has already been awaited elsewhere
    pub async fn wait(&self) -> Option<i32> {
        let child = self.child.lock().await.take();
        let Some(mut child) = child else {
            return None;
        };
        match child.wait().await {
            Ok(status) => status.code(),
            Err(err) => {
                warn!("Failed to reap child process {:?}: {}", self.pid, err);
                None
            }
        }
    }

    /// Delivers the platform's graceful-termination signal to the child (SIGTERM on
    /// unix). A child that is already gone is not an error; the outcome is observed
    /// through [`ProcessHandle::wait`] either way
    pub fn terminate(&self) {
        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;

            // Without a known pid there is nothing to signal; pid 0 would
            // address the whole process group
            let Some(pid) = self.pid else {
                return;
            };
            match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(err) => warn!("Failed to send SIGTERM to process {}: {}", pid, err),
            }
        }

        #[cfg(not(unix))]
        {
            if let Ok(mut slot) = self.child.try_lock() {
                if let Some(child) = slot.as_mut() {
                    if let Err(err) = child.start_kill() {
                        warn!("Failed to kill process {:?}: {}", self.pid, err);
                    }
                }
            }
        }
    }
}
