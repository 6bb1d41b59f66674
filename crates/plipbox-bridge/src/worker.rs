//! The console command worker as seen by the bridge loops.
//!
//! Each loop polls the worker once per iteration and keeps going only while the worker's run mode
//! is the loop's own.

use bitflags::bitflags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunMode {
    /// Production bridging through the transfer engine.
    Bridge,
    /// Loopback test of the transfer engine with UDP test traffic.
    BridgeTest,
    /// Push-style PLIP downlink.
    PlipBridge,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WorkerFlags: u8 {
        const RESET = 1 << 0;
        const DONE = 1 << 1;
        const CONFIG_CHANGED = 1 << 2;
    }
}

pub trait CommandWorker {
    /// Handle pending console input.
    fn poll(&mut self) -> WorkerFlags;

    fn run_mode(&self) -> RunMode;
}

impl<T: CommandWorker + ?Sized> CommandWorker for &mut T {
    fn poll(&mut self) -> WorkerFlags {
        (**self).poll()
    }

    fn run_mode(&self) -> RunMode {
        (**self).run_mode()
    }
}

impl<T: CommandWorker + ?Sized> CommandWorker for Box<T> {
    fn poll(&mut self) -> WorkerFlags {
        (**self).poll()
    }

    fn run_mode(&self) -> RunMode {
        (**self).run_mode()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedExit {
    Never,
    /// Report these flags once the poll budget is spent.
    Flags(WorkerFlags),
    /// Switch to another run mode once the poll budget is spent.
    Switch(RunMode),
}

/// Worker that stays in one run mode for a fixed number of polls.
#[derive(Debug, Clone)]
pub struct ScriptedWorker {
    mode: RunMode,
    polls: u64,
    budget: u64,
    exit: ScriptedExit,
}

impl ScriptedWorker {
    pub fn new(mode: RunMode) -> Self {
        Self {
            mode,
            polls: 0,
            budget: u64::MAX,
            exit: ScriptedExit::Never,
        }
    }

    pub fn exit_after(mut self, polls: u64, exit: ScriptedExit) -> Self {
        self.budget = polls;
        self.exit = exit;
        self
    }

    pub fn polls(&self) -> u64 {
        self.polls
    }
}

impl CommandWorker for ScriptedWorker {
    fn poll(&mut self) -> WorkerFlags {
        self.polls += 1;
        if self.polls <= self.budget {
            return WorkerFlags::empty();
        }
        match self.exit {
            ScriptedExit::Never => WorkerFlags::empty(),
            ScriptedExit::Flags(flags) => flags,
            ScriptedExit::Switch(mode) => {
                self.mode = mode;
                WorkerFlags::CONFIG_CHANGED
            }
        }
    }

    fn run_mode(&self) -> RunMode {
        self.mode
    }
}
