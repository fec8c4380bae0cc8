//! The fixed-size collection of supervised processes.
//!
//! All operations are simple fan-outs; processes are peers and get polled
//! round-robin, one drain each per cycle.

use anyhow::Result;

use crate::process::Process;

/// Owns the processes for one invocation. The set is fixed at construction.
#[derive(Debug)]
pub struct Supervisor {
    processes: Vec<Process>,
}

impl Supervisor {
    pub fn new(processes: Vec<Process>) -> Self {
        Self { processes }
    }

    pub fn processes(&self) -> &[Process] {
        &self.processes
    }

    pub fn processes_mut(&mut self) -> &mut [Process] {
        &mut self.processes
    }

    pub fn get(&self, i: usize) -> Option<&Process> {
        self.processes.get(i)
    }

    pub fn get_mut(&mut self, i: usize) -> Option<&mut Process> {
        self.processes.get_mut(i)
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Spawns every process in order, stopping at the first failure.
    pub fn spawn_all(&mut self) -> Result<()> {
        for process in &mut self.processes {
            process.spawn()?;
        }
        Ok(())
    }

    /// Drains each process once. Returns `true` iff any process produced
    /// bytes this cycle.
    pub fn read_all(&mut self) -> bool {
        let mut any = false;
        for process in &mut self.processes {
            if process.read_output() {
                any = true;
            }
        }
        any
    }

    /// Kills every process. Always succeeds.
    pub fn kill_all(&mut self) {
        for process in &mut self.processes {
            process.kill();
        }
    }

    pub fn any_alive(&self) -> bool {
        self.processes.iter().any(Process::is_alive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_alive_reflects_member_status() {
        let mut supervisor = Supervisor::new(vec![
            Process::new("a", "sleep 10"),
            Process::new("b", "sleep 10"),
        ]);
        assert!(!supervisor.any_alive());
        supervisor.spawn_all().unwrap();
        assert!(supervisor.any_alive());
        supervisor.get_mut(0).unwrap().kill();
        assert!(supervisor.any_alive());
        supervisor.kill_all();
        assert!(!supervisor.any_alive());
    }

    #[test]
    fn kill_all_is_idempotent() {
        let mut supervisor = Supervisor::new(vec![Process::new("a", "sleep 10")]);
        supervisor.spawn_all().unwrap();
        supervisor.kill_all();
        supervisor.kill_all();
        assert!(!supervisor.any_alive());
    }

    #[test]
    fn read_all_reports_flow_from_any_member() {
        let mut supervisor = Supervisor::new(vec![
            Process::new("quiet", "sleep 10"),
            Process::new("noisy", "echo hi; sleep 10"),
        ]);
        supervisor.spawn_all().unwrap();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        let mut flowed = false;
        while std::time::Instant::now() < deadline {
            if supervisor.read_all() {
                flowed = true;
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        supervisor.kill_all();
        assert!(flowed);
    }
}
