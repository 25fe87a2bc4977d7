#![allow(unsafe_code)]

use std::io;
use std::path::Path;

use crate::command::CommandLine;

pub use self::imp::Process;

/// Creates and tears down server processes.
///
/// The supervisor owns every handle a launcher gives out; nothing else waits
/// on or terminates it.
pub trait Launcher {
    type Handle;

    /// Spawns `command` in `working_directory`, detached from the caller and
    /// without inheriting its standard streams. Only OS-level failures are
    /// reported here.
    fn spawn(&mut self, command: &CommandLine, working_directory: &Path) -> io::Result<Self::Handle>;

    /// Non-blocking liveness check.
    fn is_alive(&mut self, handle: &mut Self::Handle) -> bool;

    /// Forced, best-effort termination. Calling it on a process that already
    /// exited does nothing.
    fn terminate(&mut self, handle: &mut Self::Handle, recursive: bool);
}

/// Launches real OS processes.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessLauncher;

impl Launcher for ProcessLauncher {
    type Handle = Process;

    fn spawn(&mut self, command: &CommandLine, working_directory: &Path) -> io::Result<Process> {
        Process::new(command, working_directory)
    }

    fn is_alive(&mut self, handle: &mut Process) -> bool {
        handle.is_alive()
    }

    fn terminate(&mut self, handle: &mut Process, recursive: bool) {
        handle.terminate(recursive)
    }
}

fn build_command(command: &CommandLine, working_directory: &Path) -> std::process::Command {
    use std::process::{Command, Stdio};

    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    if !working_directory.as_os_str().is_empty() {
        cmd.current_dir(working_directory);
    }

    cmd
}

#[cfg(target_family = "unix")]
mod imp {
    use crate::command::CommandLine;
    use nix::sys::signal::{self, SigSet, SigmaskHow, Signal};
    use nix::sys::wait::waitpid;
    use nix::unistd::{setsid, Pid};
    use nix::{self, errno::Errno, Error};
    use std::convert::TryInto;
    use std::io::{self, Result};
    use std::os::unix::process::CommandExt;
    use std::path::Path;
    use std::process::Child;
    use std::thread;
    use std::time::{Duration, Instant};

    /// How long releasing a handle waits for the killed server to be reaped
    /// before leaving it to a background waiter.
    const REAP_GRACE: Duration = Duration::from_millis(200);
    const REAP_POLL: Duration = Duration::from_millis(5);

    /// A spawned server, leader of its own session and process group.
    ///
    /// Dropping the handle kills the leader if it is still running and reaps
    /// it, so a released server never lingers as a zombie.
    #[derive(Debug)]
    pub struct Process {
        child: Child,
        pgid: nix::libc::pid_t,
        exited: bool,
    }

    fn from_nix_error(err: nix::Error) -> io::Error {
        match err {
            Error::Sys(errno) => io::Error::from_raw_os_error(errno as i32),
            Error::InvalidPath => io::Error::new(io::ErrorKind::InvalidInput, err),
            _ => io::Error::new(io::ErrorKind::Other, err),
        }
    }

    impl Process {
        pub fn new(command: &CommandLine, working_directory: &Path) -> Result<Self> {
            let mut cmd = super::build_command(command, working_directory);
            debug!("Assembled command {:?}", cmd);

            // The child inherits our blocked signal mask; clear it so the
            // server still reacts to SIGTERM/SIGINT sent by others.
            unsafe {
                cmd.pre_exec(|| {
                    setsid().map_err(from_nix_error)?;
                    signal::sigprocmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::empty()), None)
                        .map_err(from_nix_error)
                });
            }

            let child = cmd.spawn()?;
            let pgid = child
                .id()
                .try_into()
                .map_err(|_| io::Error::new(io::ErrorKind::Other, "pid does not fit in pid_t"))?;

            debug!("Spawned process group {}", pgid);
            Ok(Self {
                child,
                pgid,
                exited: false,
            })
        }

        pub fn id(&self) -> u32 {
            self.child.id()
        }

        pub fn is_alive(&mut self) -> bool {
            if self.exited {
                return false;
            }

            match self.child.try_wait() {
                Ok(None) => true,
                Ok(Some(status)) => {
                    debug!("Process {} exited with {}", self.pgid, status);
                    self.exited = true;
                    false
                }
                Err(err) => {
                    warn!("Could not query process {}: {}", self.pgid, err);
                    false
                }
            }
        }

        pub fn terminate(&mut self, recursive: bool) {
            if self.exited {
                // A reaped leader frees its pid, and with it the group id.
                debug!("Process {} already reaped, not signalling it", self.pgid);
                return;
            }

            if recursive {
                // An unreaped leader, even a zombie, keeps the group id ours.
                debug!("Killing process group {}", self.pgid);
                match signal::kill(Pid::from_raw(-self.pgid), Signal::SIGKILL) {
                    Ok(()) | Err(Error::Sys(Errno::ESRCH)) => {}
                    Err(err) => warn!("Could not kill process group {}: {}", self.pgid, err),
                }
            } else {
                debug!("Killing process {}", self.pgid);
                if let Err(err) = self.child.kill() {
                    if err.kind() != io::ErrorKind::InvalidInput {
                        warn!("Could not kill process {}: {}", self.pgid, err);
                    }
                }
            }

            // Reap if it already went away; otherwise a later liveness check will.
            let _ = self.is_alive();
        }

        fn reap(&mut self) {
            let deadline = Instant::now() + REAP_GRACE;
            loop {
                match self.child.try_wait() {
                    Ok(Some(_)) | Err(_) => {
                        self.exited = true;
                        return;
                    }
                    Ok(None) if Instant::now() >= deadline => break,
                    Ok(None) => thread::sleep(REAP_POLL),
                }
            }

            debug!("Process {} still exiting, reaping it in the background", self.pgid);
            let pid = Pid::from_raw(self.pgid);
            let waiter = thread::Builder::new()
                .name(format!("reap-{}", self.pgid))
                .spawn(move || {
                    let _ = waitpid(pid, None);
                });
            if let Err(err) = waiter {
                warn!("Could not reap process {}: {}", self.pgid, err);
            }
            self.exited = true;
        }
    }

    impl Drop for Process {
        fn drop(&mut self) {
            if self.exited {
                return;
            }

            if let Err(err) = self.child.kill() {
                if err.kind() != io::ErrorKind::InvalidInput {
                    warn!("Could not kill process {}: {}", self.pgid, err);
                }
            }
            self.reap();
        }
    }
}

#[cfg(target_family = "windows")]
mod imp {
    use crate::command::CommandLine;
    use std::convert::TryInto;
    use std::io::{self, Result};
    use std::mem;
    use std::os::windows::io::AsRawHandle;
    use std::os::windows::process::CommandExt;
    use std::path::Path;
    use std::process::Child;
    use std::ptr;
    use winapi::{
        shared::minwindef::{DWORD, LPVOID},
        um::{
            handleapi::{CloseHandle, INVALID_HANDLE_VALUE},
            jobapi2::{
                AssignProcessToJobObject, CreateJobObjectW, SetInformationJobObject,
                TerminateJobObject,
            },
            processthreadsapi::{GetProcessId, OpenThread, ResumeThread},
            tlhelp32::{
                CreateToolhelp32Snapshot, Thread32First, Thread32Next, TH32CS_SNAPTHREAD,
                THREADENTRY32,
            },
            winbase::{CREATE_NEW_PROCESS_GROUP, CREATE_NO_WINDOW, CREATE_SUSPENDED},
            winnt::{
                JobObjectExtendedLimitInformation, HANDLE, JOBOBJECT_EXTENDED_LIMIT_INFORMATION,
                JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE, THREAD_SUSPEND_RESUME,
            },
        },
    };

    /// A spawned server and the job object holding its process tree.
    ///
    /// Dropping the handle closes the job, which kills anything left in it.
    pub struct Process {
        child: Child,
        job: HANDLE,
        exited: bool,
    }

    fn last_err() -> io::Error {
        io::Error::last_os_error()
    }

    fn create_job() -> Result<HANDLE> {
        let job = unsafe { CreateJobObjectW(ptr::null_mut(), ptr::null()) };
        if job.is_null() {
            return Err(last_err());
        }

        let mut info: JOBOBJECT_EXTENDED_LIMIT_INFORMATION = unsafe { mem::zeroed() };
        info.BasicLimitInformation.LimitFlags = JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE;
        let r = unsafe {
            SetInformationJobObject(
                job,
                JobObjectExtendedLimitInformation,
                &mut info as *mut _ as LPVOID,
                mem::size_of_val(&info)
                    .try_into()
                    .map_err(|_| io::Error::new(io::ErrorKind::Other, "job info too large"))?,
            )
        };
        if r == 0 {
            let err = last_err();
            unsafe {
                CloseHandle(job);
            }
            return Err(err);
        }

        Ok(job)
    }

    impl Process {
        pub fn new(command: &CommandLine, working_directory: &Path) -> Result<Self> {
            let mut cmd = super::build_command(command, working_directory);
            cmd.creation_flags(CREATE_SUSPENDED | CREATE_NO_WINDOW | CREATE_NEW_PROCESS_GROUP);
            debug!("Assembled command {:?}", cmd);

            let job = create_job()?;
            let mut child = match cmd.spawn() {
                Ok(child) => child,
                Err(err) => {
                    unsafe {
                        CloseHandle(job);
                    }
                    return Err(err);
                }
            };

            let handle = child.as_raw_handle() as HANDLE;
            if unsafe { AssignProcessToJobObject(job, handle) } == 0 {
                let err = last_err();
                let _ = child.kill();
                unsafe {
                    CloseHandle(job);
                }
                return Err(err);
            }

            if let Err(err) = resume_threads(handle) {
                let _ = child.kill();
                unsafe {
                    CloseHandle(job);
                }
                return Err(err);
            }

            Ok(Self {
                child,
                job,
                exited: false,
            })
        }

        pub fn id(&self) -> u32 {
            self.child.id()
        }

        pub fn is_alive(&mut self) -> bool {
            if self.exited {
                return false;
            }

            match self.child.try_wait() {
                Ok(None) => true,
                Ok(Some(status)) => {
                    debug!("Process {} exited with {}", self.child.id(), status);
                    self.exited = true;
                    false
                }
                Err(err) => {
                    warn!("Could not query process {}: {}", self.child.id(), err);
                    false
                }
            }
        }

        pub fn terminate(&mut self, recursive: bool) {
            if recursive {
                if unsafe { TerminateJobObject(self.job, 1) } == 0 {
                    warn!("Could not terminate job: {}", last_err());
                }
            } else if !self.exited {
                if let Err(err) = self.child.kill() {
                    warn!("Could not kill process {}: {}", self.child.id(), err);
                }
            }

            let _ = self.is_alive();
        }
    }

    impl Drop for Process {
        fn drop(&mut self) {
            unsafe {
                let _ = CloseHandle(self.job);
            }
        }
    }

    unsafe impl Send for Process {}

    // Processes created suspended have to be resumed thread by thread; std
    // does not expose the primary thread handle.
    fn resume_threads(child_process: HANDLE) -> Result<()> {
        let mut entry: THREADENTRY32 = unsafe { mem::zeroed() };
        entry.dwSize = mem::size_of::<THREADENTRY32>()
            .try_into()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "thread entry too large"))?;

        let owner = unsafe { GetProcessId(child_process) };
        let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPTHREAD, 0) };
        if snapshot.is_null() || snapshot == INVALID_HANDLE_VALUE {
            return Err(last_err());
        }

        let mut resumed = 0_usize;
        let mut more = unsafe { Thread32First(snapshot, &mut entry) } != 0;
        while more {
            if entry.th32OwnerProcessID == owner {
                let thread = unsafe { OpenThread(THREAD_SUSPEND_RESUME, 0, entry.th32ThreadID) };
                if thread.is_null() || thread == INVALID_HANDLE_VALUE {
                    warn!("Could not open thread {}: {}", entry.th32ThreadID, last_err());
                } else {
                    if unsafe { ResumeThread(thread) } == DWORD::max_value() {
                        warn!("Could not resume thread {}: {}", entry.th32ThreadID, last_err());
                    } else {
                        resumed += 1;
                    }
                    unsafe {
                        CloseHandle(thread);
                    }
                }
            }

            more = unsafe { Thread32Next(snapshot, &mut entry) } != 0;
        }

        unsafe {
            CloseHandle(snapshot);
        }

        if resumed == 0 {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "no thread of the new process could be resumed",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
#[cfg(target_family = "unix")]
mod tests {
    use super::{Launcher, ProcessLauncher};
    use crate::command::CommandLine;
    #[cfg(target_os = "linux")]
    use std::{fs, path::PathBuf};
    use std::path::Path;
    use std::thread;
    use std::time::{Duration, Instant};

    fn command(program: &str, args: &[&str]) -> CommandLine {
        CommandLine::new(program, args.iter().map(|a| a.to_string()).collect())
    }

    fn eventually(mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        false
    }

    fn wait_for_exit(launcher: &mut ProcessLauncher, handle: &mut super::Process) -> bool {
        eventually(|| !launcher.is_alive(&mut *handle))
    }

    #[cfg(target_os = "linux")]
    fn scratch_file(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "mcp-supervisor-{}-{}",
            std::process::id(),
            name
        ));
        let _ = fs::remove_file(&path);
        path
    }

    /// Waits for a shell to write the pid of its background job.
    #[cfg(target_os = "linux")]
    fn read_pid(path: &Path) -> i32 {
        let mut pid = None;
        assert!(eventually(|| {
            pid = fs::read_to_string(path)
                .ok()
                .and_then(|text| text.trim().parse().ok());
            pid.is_some()
        }));
        let _ = fs::remove_file(path);
        pid.unwrap_or_default()
    }

    /// State letter from `/proc/<pid>/stat`, if the pid exists at all.
    #[cfg(target_os = "linux")]
    fn proc_state(pid: i32) -> Option<char> {
        let stat = fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
        stat.rsplit(')').next()?.trim_start().chars().next()
    }

    #[cfg(target_os = "linux")]
    fn is_running(pid: i32) -> bool {
        proc_state(pid).map_or(false, |state| state != 'Z')
    }

    #[cfg(target_os = "linux")]
    fn kill_pid(pid: i32) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let _ = kill(Pid::from_raw(pid), Signal::SIGKILL);
    }

    #[test]
    fn spawned_process_is_alive_until_terminated() {
        let mut launcher = ProcessLauncher;
        let mut handle = launcher
            .spawn(&command("sleep", &["30"]), Path::new(""))
            .expect("spawn sleep");

        assert!(handle.id() > 0);
        assert!(launcher.is_alive(&mut handle));

        launcher.terminate(&mut handle, true);
        assert!(wait_for_exit(&mut launcher, &mut handle));
    }

    #[test]
    fn terminate_is_idempotent() {
        let mut launcher = ProcessLauncher;
        let mut handle = launcher
            .spawn(&command("true", &[]), Path::new(""))
            .expect("spawn true");

        assert!(wait_for_exit(&mut launcher, &mut handle));
        launcher.terminate(&mut handle, true);
        launcher.terminate(&mut handle, false);
        assert!(!launcher.is_alive(&mut handle));
    }

    #[test]
    fn non_recursive_terminate_kills_the_leader() {
        let mut launcher = ProcessLauncher;
        let mut handle = launcher
            .spawn(&command("sleep", &["30"]), Path::new("/"))
            .expect("spawn sleep");

        launcher.terminate(&mut handle, false);
        assert!(wait_for_exit(&mut launcher, &mut handle));
    }

    #[test]
    fn missing_executable_fails_synchronously() {
        let err = ProcessLauncher
            .spawn(
                &command("/nonexistent/mcp-runner-for-tests", &["run"]),
                Path::new(""),
            )
            .expect_err("spawn must fail");

        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn recursive_terminate_kills_descendants() {
        let pidfile = scratch_file("recursive");
        let script = format!("sleep 30 & echo $! > {}; wait", pidfile.display());
        let mut launcher = ProcessLauncher;
        let mut handle = launcher
            .spawn(&command("sh", &["-c", &script]), Path::new(""))
            .expect("spawn sh");

        let grandchild = read_pid(&pidfile);
        assert!(is_running(grandchild));

        launcher.terminate(&mut handle, true);
        assert!(wait_for_exit(&mut launcher, &mut handle));
        assert!(eventually(|| !is_running(grandchild)));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn non_recursive_terminate_spares_descendants() {
        let pidfile = scratch_file("leader-only");
        let script = format!("sleep 30 & echo $! > {}; wait", pidfile.display());
        let mut launcher = ProcessLauncher;
        let mut handle = launcher
            .spawn(&command("sh", &["-c", &script]), Path::new(""))
            .expect("spawn sh");

        let grandchild = read_pid(&pidfile);
        launcher.terminate(&mut handle, false);
        assert!(wait_for_exit(&mut launcher, &mut handle));

        let survived = is_running(grandchild);
        kill_pid(grandchild);
        assert!(survived);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn reaped_leader_group_is_not_signalled() {
        let pidfile = scratch_file("reaped-leader");
        let script = format!("sleep 30 & echo $! > {}", pidfile.display());
        let mut launcher = ProcessLauncher;
        let mut handle = launcher
            .spawn(&command("sh", &["-c", &script]), Path::new(""))
            .expect("spawn sh");

        let grandchild = read_pid(&pidfile);
        assert!(wait_for_exit(&mut launcher, &mut handle));

        launcher.terminate(&mut handle, true);
        let survived = is_running(grandchild);
        kill_pid(grandchild);
        assert!(survived);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn released_handle_leaves_no_zombie() {
        let mut launcher = ProcessLauncher;
        let handle = launcher
            .spawn(&command("true", &[]), Path::new(""))
            .expect("spawn true");
        let pid = handle.id() as i32;

        // Exited but never waited on.
        assert!(eventually(|| proc_state(pid) == Some('Z')));

        drop(handle);
        assert!(eventually(|| proc_state(pid).is_none()));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn released_running_process_is_killed_and_reaped() {
        let mut launcher = ProcessLauncher;
        let handle = launcher
            .spawn(&command("sleep", &["30"]), Path::new(""))
            .expect("spawn sleep");
        let pid = handle.id() as i32;

        drop(handle);
        assert!(eventually(|| proc_state(pid).is_none()));
    }
}
