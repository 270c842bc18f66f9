//! Everything pertaining to running an emulated process.

use tracing::{trace, warn};

use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::common::Trace;
use crate::common::util::*;
use crate::loader::{self, LoadedImage, LoadError, Symbol};
use crate::os::{self, ForkMode, Os, signal::{self, SignalActionTable, Disposition}};

pub mod registers;
pub mod memory;
pub mod cache;
pub mod fs;

use memory::*;
use cache::*;
use fs::*;

/// Current state of a process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// The process is still running.
    Running,
    /// The process exited with the given code.
    Terminated(i32),
    /// The process was killed by an execution error.
    Error(ExecError),
}

/// Reasons why an error can happen during execution.
/// Every one of these is fatal to the process, which then exits with code -1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecError {
    /// The bytes at the instruction pointer do not encode an instruction.
    UndefinedInstruction,
    /// The instruction is valid but has no meaning in a flat user-mode process
    /// (segment loads, far transfers, port IO, halt, privileged PDP-11 operations, ...).
    UnimplementedInstruction,
    /// The stack pointer dropped below the break.
    StackOverflow,
    /// The PDP-11 tried to execute an instruction extending past the end of the text segment.
    ExecuteOutsideText,
    /// A division instruction attempted to divide by zero.
    DivideByZero,
    /// A division had a quotient which could not be truncated to the destination size.
    DivisionOverflow,
    /// The system call is known but not emulated.
    UnimplementedSyscall,
    /// The system call number is not known at all.
    UnknownSyscall,
}
impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            ExecError::UndefinedInstruction => "undefined instruction",
            ExecError::UnimplementedInstruction => "not implemented",
            ExecError::StackOverflow => "stack overflow",
            ExecError::ExecuteOutsideText => "overrun",
            ExecError::DivideByZero => "divide by zero",
            ExecError::DivisionOverflow => "division overflow",
            ExecError::UnimplementedSyscall => "syscall not implemented",
            ExecError::UnknownSyscall => "unknown syscall",
        })
    }
}

/// Reason why execution stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The process was not in the running state.
    NotRunning,
    /// The process executed the requested number of cycles.
    MaxCycles,
    /// An error was encountered during execution.
    /// For convenience, this variant stores the error,
    /// but it can also be accessed by testing the process state.
    Error(ExecError),
    /// The process exited.
    /// For convenince, this variant stores the exit code,
    /// but it can also be accessed by testing the process state.
    Terminated(i32),
}

/// What the engine has to do after an instruction executed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// Nothing, go on with the next instruction.
    Continue,
    /// A system call trap with the given number.
    Trap(u16),
    /// A return executed with the stack back at its entry position: the process is done.
    Return,
}

/// Truncates a value to the given size (0 = byte, 1 = word, 2 = double word), which is then zero extended.
pub(crate) fn truncate(val: u32, sizecode: u8) -> u32 {
    match sizecode {
        0 => val as u8 as u32,
        1 => val as u16 as u32,
        _ => val,
    }
}
/// Sign extends a value of the given initial size to 32-bit.
/// The conversion is first performed by truncation, so bits outside the specified size range are ignored.
pub(crate) fn sign_extend(val: u32, sizecode: u8) -> u32 {
    match sizecode {
        0 => val as i8 as u32,
        1 => val as i16 as u32,
        _ => val,
    }
}
/// Gets the sign bit of the value with given size.
/// Bits outside the range of the size are ignored.
pub(crate) fn sign_bit(val: u32, sizecode: u8) -> bool {
    match sizecode {
        0 => (val as i8) < 0,
        1 => (val as i16) < 0,
        _ => (val as i32) < 0,
    }
}
/// Checks if the value has even parity.
pub(crate) fn is_parity_even(val: u8) -> bool {
    val.count_ones() % 2 == 0
}

macro_rules! calc_mul {
    ($a:ident, $b:ident : $normal:ty, $extended:ty, $normal_bits:literal) => {{
        let full = $a as $normal as $extended * $b as $normal as $extended;
        ((full >> $normal_bits) as u32, full as u32, full as $normal as $extended != full)
    }}
}

/// Computes the unsigned product of `a` and `b`.
/// Bits in `a` and `b` that are outside of `sizecode` are ignored.
/// Returns the upper half, the full product (truncate it for the lower half),
/// and a flag denoting if the upper half is significant.
pub(crate) fn raw_mul(sizecode: u8, a: u32, b: u32) -> (u32, u32, bool) {
    match sizecode {
        0 => calc_mul!(a, b : u8, u16, 8),
        1 => calc_mul!(a, b : u16, u32, 16),
        _ => unreachable!(),
    }
}
/// As `raw_mul` except performs signed multiplication.
/// The flag is set when the product differs from the sign extension of its low half.
pub(crate) fn raw_imul(sizecode: u8, a: u32, b: u32) -> (u32, u32, bool) {
    match sizecode {
        0 => calc_mul!(a, b : i8, i16, 8),
        1 => calc_mul!(a, b : i16, i32, 16),
        _ => unreachable!(),
    }
}

macro_rules! calc_div {
    ($a:ident, $b:ident : $normal:ty, $extended:ty) => {{
        let (quo, rem) = quotient_and_remainder($a as $extended, $b as $normal as $extended)?;
        Some((quo as u32, rem as u32, quo as $normal as $extended != quo))
    }}
}

/// Computes the division of the double-width numerator `a` by the denominator `b`.
/// Returns the quotient, the remainder, and a flag denoting overflow of the quotient,
/// or `None` if the division is undefined.
pub(crate) fn raw_div(sizecode: u8, a: u32, b: u32) -> Option<(u32, u32, bool)> {
    match sizecode {
        0 => calc_div!(a, b : u8, u16),
        1 => calc_div!(a, b : u16, u32),
        _ => unreachable!(),
    }
}
/// As `raw_div` except performs signed division, truncating toward zero.
pub(crate) fn raw_idiv(sizecode: u8, a: u32, b: u32) -> Option<(u32, u32, bool)> {
    match sizecode {
        0 => calc_div!(a, b : i8, i16),
        1 => calc_div!(a, b : i16, i32),
        _ => unreachable!(),
    }
}

/// A processor that can be driven by the engine.
///
/// Decoding is a pure function of the code bytes, so decoded instructions can be cached by address.
/// Executing an instruction happens after the engine has already advanced the instruction pointer past it.
pub trait Cpu: Clone + Default + fmt::Display {
    /// One decoded instruction, which carries its own encoded length.
    type Instruction: Clone + fmt::Debug + fmt::Display + PartialEq;

    /// Decodes the instruction at `addr`. Bytes past the end of `code` read as zero.
    fn decode(code: &[u8], addr: u16) -> Self::Instruction;
    /// The encoded length of an instruction in bytes.
    fn length(inst: &Self::Instruction) -> u16;
    /// Checks if an instruction is the placeholder for bytes that decode to nothing.
    fn is_undefined(inst: &Self::Instruction) -> bool;

    /// Gets the next instruction to execute, going through the cache.
    fn fetch(&self, memory: &AddressSpace, cache: &mut DecodeCache<Self::Instruction>) -> Self::Instruction {
        let ip = self.ip();
        cache.get_or_decode(ip, || Self::decode(memory.text(), ip))
    }
    /// Executes one instruction.
    fn execute(&mut self, inst: &Self::Instruction, memory: &mut AddressSpace) -> Result<Event, ExecError>;

    fn ip(&self) -> u16;
    fn set_ip(&mut self, val: u16);
    fn sp(&self) -> u16;
    fn set_sp(&mut self, val: u16);
    /// The stack pointer recorded when the process was started.
    fn start_sp(&self) -> u16;
    fn set_start_sp(&mut self, val: u16);

    /// The register system calls take their first argument in and return their result in (AX or r0).
    fn result(&self) -> u16;
    fn set_result(&mut self, val: u16);
    /// Sets or clears the carry flag.
    fn assign_carry(&mut self, val: bool);

    /// Pushes a word onto the stack.
    fn push(&mut self, memory: &mut AddressSpace, val: u16) {
        let sp = self.sp().wrapping_sub(2);
        self.set_sp(sp);
        memory.set_u16(sp, val);
    }
}

/// Holds options for running an emulated process.
#[derive(Clone, Debug, Default)]
pub struct EmulatorArgs {
    /// Directory that absolute emulated paths are resolved in.
    /// If omitted, paths are passed to the host unchanged.
    pub root: Option<PathBuf>,
    /// Which execution details to emit through `tracing`.
    pub trace: Trace,
    /// How emulated fork is carried out.
    /// If omitted, defaults to `ForkMode::default()`, which depends on the `host-fork` feature.
    pub fork_mode: Option<ForkMode>,
    /// The environment to give Minix programs.
    /// If omitted, defaults to `PATH=/bin:/usr/bin`.
    pub environment: Option<Vec<String>>,
}

/// An emulated process: one CPU, its 64K of memory, and its view of the host.
pub struct Process<O: Os> {
    pub cpu: O::Cpu,
    pub memory: AddressSpace,
    pub files: FileTable,
    pub signals: SignalActionTable,
    pub pid: u16,
    pub umask: u16,
    pub symbols: Vec<Symbol>,
    pub args: Rc<EmulatorArgs>,

    pub(crate) cache: DecodeCache<<O::Cpu as Cpu>::Instruction>,
    state: State,
}
impl<O: Os> Process<O> {
    /// Creates a process running `image` from its entry point.
    /// The stack is empty; `Os::set_args` lays out the arguments.
    pub fn new(image: LoadedImage, args: Rc<EmulatorArgs>) -> Self {
        let mut p = Process {
            cpu: Default::default(),
            memory: AddressSpace::shared(),
            files: FileTable::new(),
            signals: SignalActionTable::new(O::NSIG),
            pid: os::next_pid(),
            umask: 0,
            symbols: vec![],
            args,

            cache: DecodeCache::new(false),
            state: State::Running,
        };
        p.install_image(image);
        p
    }

    /// Loads the binary at `path` and sets up its arguments.
    pub fn load(path: &Path, argv: &[String], args: EmulatorArgs) -> Result<Self, LoadError> {
        let image = O::load(&loader::read_binary(path)?)?;
        let env = args.environment.clone().unwrap_or_else(|| O::default_environment());
        let mut p = Self::new(image, Rc::new(args));
        O::set_args(&mut p, argv, &env);
        Ok(p)
    }

    /// Replaces the program: memory, registers and cached instructions all come from `image`.
    pub(crate) fn install_image(&mut self, image: LoadedImage) {
        self.cache = DecodeCache::new(image.memory.is_split());
        self.memory = image.memory;
        self.symbols = image.symbols;
        self.cpu = Default::default();
        self.cpu.set_ip(image.entry);
    }

    /// A copy of this process for a simulated fork. File handles are shared, the pid is new.
    pub(crate) fn duplicate(&self) -> Self {
        Process {
            cpu: self.cpu.clone(),
            memory: self.memory.clone(),
            files: self.files.clone(),
            signals: self.signals.clone(),
            pid: os::next_pid(),
            umask: self.umask,
            symbols: self.symbols.clone(),
            args: self.args.clone(),

            cache: self.cache.clone(),
            state: self.state,
        }
    }

    /// Gets the current state of the process.
    pub fn get_state(&self) -> State {
        self.state
    }
    pub fn is_running(&self) -> bool {
        self.state == State::Running
    }
    /// Terminates the process with the given exit code.
    pub fn exit(&mut self, code: i32) {
        self.state = State::Terminated(code);
    }
    /// The exit code of a finished process. Execution errors exit with -1.
    pub fn exit_code(&self) -> Option<i32> {
        match self.state {
            State::Running => None,
            State::Terminated(r) => Some(r),
            State::Error(_) => Some(-1),
        }
    }

    /// Executes one instruction, after delivering any host signal that arrived since the last one.
    pub fn step(&mut self) -> Result<(), ExecError> {
        if let Some(sig) = signal::take_pending::<O>() {
            self.deliver(sig)?;
            if !self.is_running() { return Ok(()); }
        }

        let ip = self.cpu.ip();
        let inst = self.cpu.fetch(&self.memory, &mut self.cache);
        let len = O::Cpu::length(&inst);
        if self.args.trace >= Trace::Memory {
            trace!(target: "regs", "{}", self.cpu);
        }
        if self.args.trace >= Trace::Instructions {
            trace!(target: "exec", "{:04x}: {}", ip, inst);
        }

        if let Some(runmax) = self.memory.runmax {
            if ip as u32 + len as u32 > runmax {
                warn!(target: "exec", "{:04x}: overrun", ip);
                return Err(ExecError::ExecuteOutsideText);
            }
        }
        if self.cpu.sp() < self.memory.brk {
            warn!(target: "exec", "stack overflow: sp={:04x} brk={:04x}", self.cpu.sp(), self.memory.brk);
            return Err(ExecError::StackOverflow);
        }

        self.cpu.set_ip(ip.wrapping_add(len));
        match self.cpu.execute(&inst, &mut self.memory) {
            Ok(Event::Continue) => Ok(()),
            Ok(Event::Return) => {
                self.exit(0);
                Ok(())
            }
            Ok(Event::Trap(n)) => O::syscall(self, n),
            Err(e) => {
                warn!(target: "exec", "{:04x}: {}: {}", ip, inst, e);
                Err(e)
            }
        }
    }

    /// Resumes execution of the process for up to the given number of cycles.
    /// Returns the number of cycles executed and the reason for stopping.
    pub fn execute_cycles(&mut self, cycles: u64) -> (u64, StopReason) {
        if self.state != State::Running { return (0, StopReason::NotRunning); }

        for cycle in 0..cycles {
            if let Err(e) = self.step() {
                self.state = State::Error(e);
                return (cycle, StopReason::Error(e));
            }
            if let State::Terminated(r) = self.state {
                return (cycle + 1, StopReason::Terminated(r)); // +1 because this cycle succeeded
            }
        }

        (cycles, StopReason::MaxCycles)
    }

    /// Runs the process to completion as the current signal target and returns its exit code.
    pub fn run(&mut self) -> i32 {
        let previous = signal::set_current(Some(self.pid));
        signal::switch_signals::<O>(&self.signals, false);
        self.execute_cycles(u64::MAX);
        signal::set_current(previous);
        self.exit_code().unwrap_or(-1)
    }

    /// Runs the emulated handler for `sig` as if the signal interrupted the current instruction.
    ///
    /// The handler is entered with the interrupted instruction pointer pushed, and runs until it returns to it
    /// with the stack back where it was. Registers and flags are then restored; memory effects persist.
    pub fn deliver(&mut self, sig: u16) -> Result<(), ExecError> {
        let handler = match O::disposition(self.signals.get(sig).handler) {
            Disposition::Catch(h) => h,
            _ => return Ok(()),
        };

        let saved = self.cpu.clone();
        let (ip, sp) = (saved.ip(), saved.sp());
        self.cpu.push(&mut self.memory, ip);
        self.cpu.set_ip(handler);
        while self.is_running() && !(self.cpu.ip() == ip && self.cpu.sp() == sp) {
            self.step()?;
        }
        if self.is_running() {
            self.cpu = saved;
        }
        Ok(())
    }

    /// Writes a listing of the text segment, one instruction per line.
    pub fn disassemble<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let text = self.memory.text();
        let end = self.memory.tsize as usize;
        let mut addr = 0;
        let mut undefined = 0;
        while addr < end {
            for sym in self.symbols.iter().filter(|s| s.is_text() && s.addr as usize == addr) {
                writeln!(out, "{}:", sym.name)?;
            }
            let inst = O::Cpu::decode(text, addr as u16);
            let len = O::Cpu::length(&inst).max(1) as usize;
            if O::Cpu::is_undefined(&inst) { undefined += 1; }

            let bytes = &text[addr..(addr + len).min(text.len())];
            for (i, chunk) in bytes.chunks(6).enumerate() {
                let hex: String = chunk.iter().map(|b| format!("{:02x}", b)).collect();
                if i == 0 {
                    writeln!(out, "{:04x}: {:<14} {}", addr, hex, inst)?;
                } else {
                    writeln!(out, "      {}", hex)?;
                }
            }
            addr += len;
        }
        if undefined > 0 {
            writeln!(out, "undefined: {}", undefined)?;
        }
        Ok(())
    }
}
