use sysinfo::{Pid, System};

/// Side-effect-free answer to "is this process id still running?".
pub trait LivenessProbe: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Probes the process table of the local host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl LivenessProbe for SystemProbe {
    fn is_alive(&self, pid: u32) -> bool {
        if pid == 0 {
            return false;
        }
        let mut system = System::new();
        system.refresh_process(Pid::from_u32(pid))
    }
}
