use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::{
    air::Instr,
    bus::{Bus, Detached, Devices, ScreenBuffer},
    config::SimConfig,
    error::{ConfigError, Fault, LoadError},
    isa::{Flags, Register, INST_MEM_BYTES, INST_MEM_WORDS, NUM_REGISTERS, STACK_DEPTH},
};

/// Why the simulator stopped accepting steps.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Halt {
    /// The cycle counter reached the configured maximum
    CycleLimit,
    Fault(Fault),
}

/// Result of [`Simulator::run`].
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum RunOutcome {
    CycleLimit,
    Fault(Fault),
    /// Step budget used up, the machine can still continue
    Paused,
}

/// Owned copy of everything a driver may want to display.
#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct MachineState {
    pub registers: [u8; NUM_REGISTERS],
    pub pc: u16,
    pub flags: Flags,
    /// Return addresses, top of stack last
    pub stack: Vec<u16>,
    pub halted: bool,
    pub cycle_count: u64,
    pub screen: ScreenBuffer,
}

/// Represents complete processor state during runtime.
struct RunState {
    /// Instruction memory, zero padded
    mem: Box<[u8; INST_MEM_BYTES]>,
    /// 1-based word address of the next instruction
    pc: u16,
    reg: [u8; NUM_REGISTERS],
    flags: Flags,
    stack: Vec<u16>,
    cycles: u64,
    halt: Option<Halt>,
}

impl RunState {
    fn new() -> Self {
        RunState {
            mem: Box::new([0; INST_MEM_BYTES]),
            pc: 1,
            reg: [0; NUM_REGISTERS],
            flags: Flags::default(),
            stack: Vec::with_capacity(STACK_DEPTH),
            cycles: 0,
            halt: None,
        }
    }
}

/// Fetch-decode-execute engine with its memory-mapped devices.
pub struct Simulator<D: Devices = Detached> {
    config: SimConfig,
    state: RunState,
    bus: Bus,
    devices: D,
}

impl Simulator<Detached> {
    /// Simulator with no device observer attached.
    pub fn new(config: SimConfig) -> Result<Self, ConfigError> {
        Simulator::with_devices(config, Detached)
    }
}

impl<D: Devices> Simulator<D> {
    pub fn with_devices(config: SimConfig, devices: D) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Simulator {
            bus: Bus::new(config.screen_width, config.screen_height, config.rng_seed),
            state: RunState::new(),
            config,
            devices,
        })
    }

    /// Zero every register, both memories, the screen and the counters.
    pub fn reset(&mut self) {
        self.state = RunState::new();
        self.bus.reset();
    }

    /// Reset, then copy `code` into instruction memory.
    pub fn load_code(&mut self, code: &[u8]) -> Result<(), LoadError> {
        self.reset();
        if code.len() > INST_MEM_BYTES {
            return Err(LoadError::TooLarge { len: code.len() });
        }
        self.state.mem[..code.len()].copy_from_slice(code);
        debug!(bytes = code.len(), "loaded program");
        Ok(())
    }

    /// Execute one instruction. `Ok(false)` once the machine is halted, without a fault.
    pub fn step(&mut self) -> Result<bool, Fault> {
        if self.state.halt.is_some() {
            return Ok(false);
        }
        if let Err(fault) = self.execute() {
            warn!(pc = self.state.pc, %fault, "runtime fault");
            self.state.halt = Some(Halt::Fault(fault.clone()));
            return Err(fault);
        }

        self.state.cycles += 1;
        if self.state.cycles >= self.config.max_cycles {
            warn!(cycles = self.state.cycles, "cycle limit reached");
            self.state.halt = Some(Halt::CycleLimit);
            return Ok(false);
        }
        Ok(true)
    }

    /// Step until the machine halts or `max_steps` instructions have run.
    pub fn run(&mut self, max_steps: u64) -> RunOutcome {
        for _ in 0..max_steps {
            match self.step() {
                Ok(true) => {}
                Ok(false) | Err(_) => break,
            }
        }
        match &self.state.halt {
            Some(Halt::CycleLimit) => RunOutcome::CycleLimit,
            Some(Halt::Fault(fault)) => RunOutcome::Fault(fault.clone()),
            None => RunOutcome::Paused,
        }
    }

    pub fn state(&self) -> MachineState {
        MachineState {
            registers: self.state.reg,
            pc: self.state.pc,
            flags: self.state.flags,
            stack: self.state.stack.clone(),
            halted: self.is_halted(),
            cycle_count: self.state.cycles,
            screen: self.bus.screen().clone(),
        }
    }

    pub fn halt(&self) -> Option<&Halt> {
        self.state.halt.as_ref()
    }

    pub fn is_halted(&self) -> bool {
        self.state.halt.is_some()
    }

    pub fn pc(&self) -> u16 {
        self.state.pc
    }

    pub fn registers(&self) -> &[u8; NUM_REGISTERS] {
        &self.state.reg
    }

    pub fn flags(&self) -> Flags {
        self.state.flags
    }

    pub fn cycles(&self) -> u64 {
        self.state.cycles
    }

    pub fn screen(&self) -> &ScreenBuffer {
        self.bus.screen()
    }

    pub fn data_memory(&self) -> &[u8] {
        self.bus.ram()
    }

    pub fn devices(&self) -> &D {
        &self.devices
    }

    /// Raw instruction word at a 1-based word address.
    pub fn word_at(&self, word_addr: u16) -> Option<u16> {
        if !(1..=INST_MEM_WORDS).contains(&word_addr) {
            return None;
        }
        let byte = (word_addr as usize - 1) * 2;
        Some(u16::from_be_bytes([self.state.mem[byte], self.state.mem[byte + 1]]))
    }

    fn fetch(&self) -> Result<u16, Fault> {
        let pc = self.state.pc;
        self.word_at(pc).ok_or(Fault::PcOutOfBounds { pc })
    }

    #[inline]
    fn reg(&self, reg: Register) -> u8 {
        self.state.reg[reg.index()]
    }

    /// Writes to R0 are discarded.
    #[inline]
    fn set_reg(&mut self, reg: Register, val: u8) {
        if reg != Register::ZERO {
            self.state.reg[reg.index()] = val;
        }
    }

    #[inline]
    fn set_flags(&mut self, result: u8, carry: Option<bool>) {
        self.state.flags.zero = result == 0;
        if let Some(carry) = carry {
            self.state.flags.carry = carry;
        }
    }

    fn add(&mut self, a: u8, b: u8) -> u8 {
        let sum = a as u16 + b as u16;
        let res = sum as u8;
        self.set_flags(res, Some(sum > 0xFF));
        res
    }

    /// `a + !b + 1`, carry set when no borrow occurs.
    fn sub(&mut self, a: u8, b: u8) -> u8 {
        let sum = a as u16 + (!b) as u16 + 1;
        let res = sum as u8;
        self.set_flags(res, Some(sum > 0xFF));
        res
    }

    fn execute(&mut self) -> Result<(), Fault> {
        let pc = self.state.pc;
        let word = self.fetch()?;
        let instr = Instr::decode(word).map_err(|opcode| Fault::UnknownOpcode { opcode, pc })?;
        trace!(pc, word, %instr, "execute");

        self.state.reg[0] = 0;
        let mut next = pc as u32 + 1;

        match instr {
            Instr::Nop => {}
            Instr::Ldi { dest, imm } => self.set_reg(dest, imm),
            Instr::Add { a, b, dest } => {
                let res = self.add(self.reg(a), self.reg(b));
                self.set_reg(dest, res);
            }
            Instr::Sub { a, b, dest } => {
                let res = self.sub(self.reg(a), self.reg(b));
                self.set_reg(dest, res);
            }
            Instr::Xor { a, b, dest } => {
                let res = self.reg(a) ^ self.reg(b);
                self.set_flags(res, None);
                self.set_reg(dest, res);
            }
            Instr::Rsh { src, dest } => {
                let res = self.reg(src) >> 1;
                self.set_flags(res, Some(false));
                self.set_reg(dest, res);
            }
            Instr::Adi { reg, imm } => {
                let res = self.add(self.reg(reg), imm);
                self.set_reg(reg, res);
            }
            Instr::Brh { cond, addr } => {
                if cond.holds(self.state.flags) {
                    if addr == 0 {
                        return Err(Fault::ZeroTarget {
                            mnemonic: instr.opcode(),
                        });
                    }
                    next = addr as u32;
                }
            }
            Instr::Jmp { addr } => {
                if addr == 0 {
                    return Err(Fault::ZeroTarget {
                        mnemonic: instr.opcode(),
                    });
                }
                next = addr as u32;
            }
            Instr::Cal { addr } => {
                if addr == 0 {
                    return Err(Fault::ZeroTarget {
                        mnemonic: instr.opcode(),
                    });
                }
                if self.state.stack.len() >= STACK_DEPTH {
                    return Err(Fault::StackOverflow);
                }
                // Return address always fits, pc is at most INST_MEM_WORDS
                self.state.stack.push(next as u16);
                next = addr as u32;
            }
            Instr::Ret => {
                let ret = self.state.stack.pop().ok_or(Fault::StackUnderflow)?;
                next = ret as u32;
            }
            Instr::Lod { base, reg, offset } => {
                let addr = self.reg(base).wrapping_add(offset as u8);
                let val = self.bus.read(addr, &mut self.devices);
                self.set_reg(reg, val);
            }
            Instr::Str { base, reg, offset } => {
                let addr = self.reg(base).wrapping_add(offset as u8);
                let val = self.reg(reg);
                self.bus.write(addr, val, &mut self.devices);
            }
        }

        if !(1..=INST_MEM_WORDS as u32).contains(&next) {
            return Err(Fault::NextPcOutOfBounds { target: next });
        }
        self.state.pc = next as u16;
        self.state.reg[0] = 0;
        Ok(())
    }
}
