use std::fmt::Write;

use colored::{ColoredString, Colorize};

use crate::{
    air::{Field, Instr},
    bus::{Devices, ScreenBuffer},
    isa::NUM_REGISTERS,
    runtime::MachineState,
};

/// Terminal renderer. Minimal mode prints one uncoloured `KEY value` pair per line.
#[derive(Clone, Copy, Debug, Default)]
pub struct Output {
    minimal: bool,
}

impl Output {
    pub fn new(minimal: bool) -> Self {
        Output { minimal }
    }

    pub fn is_minimal(&self) -> bool {
        self.minimal
    }

    pub fn print_state(&self, state: &MachineState) {
        print!("{}", self.render_state(state));
    }

    pub fn render_state(&self, state: &MachineState) -> String {
        let mut out = String::new();
        let stack = state
            .stack
            .iter()
            .map(|addr| addr.to_string())
            .collect::<Vec<_>>()
            .join(" ");

        if self.minimal {
            for (i, value) in state.registers.iter().enumerate() {
                let _ = writeln!(out, "R{i} {value}");
            }
            let _ = writeln!(out, "PC {}", state.pc);
            let _ = writeln!(out, "Z {}", state.flags.zero as u8);
            let _ = writeln!(out, "C {}", state.flags.carry as u8);
            let _ = writeln!(out, "STACK {stack}");
            let _ = writeln!(out, "CYCLES {}", state.cycle_count);
            return out;
        }

        out.push_str("\x1b[2m┌────────────────────────────────────┐\x1b[0m\n");
        out.push_str("\x1b[2m│        \x1b[3mhex    uint     int  binary\x1b[0m\x1b[2m │\x1b[0m\n");
        for (i, value) in state.registers.iter().enumerate() {
            let _ = writeln!(
                out,
                "\x1b[2m│\x1b[0m \x1b[1m{:<4}\x1b[0m 0x{value:02x}  {value:>5}  {:>5}  {value:08b} \x1b[2m│\x1b[0m",
                format!("R{i}"),
                *value as i8,
            );
        }
        let _ = writeln!(
            out,
            "\x1b[2m│\x1b[0m \x1b[1mPC\x1b[0m   {:<6} \x1b[1mZ\x1b[0m {}  \x1b[1mC\x1b[0m {}  \x1b[1mSP\x1b[0m {:<2}      \x1b[2m│\x1b[0m",
            state.pc,
            state.flags.zero as u8,
            state.flags.carry as u8,
            state.stack.len(),
        );
        out.push_str("\x1b[2m└────────────────────────────────────┘\x1b[0m\n");
        if !stack.is_empty() {
            let _ = writeln!(out, "  {} {stack}", "stack".dimmed());
        }
        let _ = writeln!(out, "  {} {}", "cycles".dimmed(), state.cycle_count);
        out
    }

    pub fn print_screen(&self, screen: &ScreenBuffer) {
        print!("{}", self.render_screen(screen));
    }

    /// Row 0 first. Minimal mode uses `#` and `.`.
    pub fn render_screen(&self, screen: &ScreenBuffer) -> String {
        let mut out = String::new();
        if self.minimal {
            for row in screen.rows() {
                let line: String = row.iter().map(|bit| if *bit != 0 { '#' } else { '.' }).collect();
                let _ = writeln!(out, "{line}");
            }
            return out;
        }

        let edge = "──".repeat(screen.width());
        let _ = writeln!(out, "\x1b[2m┌{edge}┐\x1b[0m");
        for row in screen.rows() {
            out.push_str("\x1b[2m│\x1b[0m");
            for bit in row {
                if *bit != 0 {
                    out.push_str("██");
                } else {
                    out.push_str("\x1b[2m··\x1b[0m");
                }
            }
            out.push_str("\x1b[2m│\x1b[0m\n");
        }
        let _ = writeln!(out, "\x1b[2m└{edge}┘\x1b[0m");
        out
    }

    /// One executed step: PC movement, source line, instruction and changed registers.
    pub fn print_trace(
        &self,
        from: u16,
        to: u16,
        line: Option<usize>,
        instr: Option<Instr>,
        before: &[u8; NUM_REGISTERS],
        after: &[u8; NUM_REGISTERS],
    ) {
        let changes = before
            .iter()
            .zip(after)
            .enumerate()
            .filter(|(_, (old, new))| old != new)
            .map(|(i, (_, new))| format!("R{i}={new}"))
            .collect::<Vec<_>>()
            .join(" ");
        let line = line.map(|n| format!("L{n}")).unwrap_or_else(|| "-".to_string());
        let instr = instr.map(|i| i.to_string()).unwrap_or_default();

        if self.minimal {
            println!("TRACE {from} {to} {line} {instr} {changes}");
        } else {
            println!(
                "{:>5} {} {:<5} {:<6} {:<16} {}",
                from,
                "→".dimmed(),
                to,
                line.dimmed(),
                instr,
                changes.yellow()
            );
        }
    }

    /// Bits of `word` split into fields, MSB first.
    pub fn render_bits(&self, word: u16, layout: &[Field; 16]) -> String {
        let mut out = String::new();
        let mut group = String::new();
        for (i, field) in layout.iter().enumerate() {
            let bit = if word & (0x8000 >> i) != 0 { '1' } else { '0' };
            group.push(bit);
            // Register fields are one nibble each
            let end = layout.get(i + 1) != Some(field) || (*field == Field::Register && i % 4 == 3);
            if end {
                if !out.is_empty() {
                    out.push(' ');
                }
                if self.minimal {
                    out.push_str(&group);
                } else {
                    let _ = write!(out, "{}", paint_field(*field, &group));
                }
                group.clear();
            }
        }
        out
    }
}

fn paint_field(field: Field, bits: &str) -> ColoredString {
    match field {
        Field::Opcode => bits.magenta().bold(),
        Field::Register => bits.cyan(),
        Field::Immediate => bits.yellow(),
        Field::Address => bits.green(),
        Field::Condition => bits.blue(),
        Field::Offset => bits.red(),
        Field::Unused => bits.dimmed(),
    }
}

/// Devices for a terminal run: frames are printed on commit, the controller reads a fixed byte.
#[derive(Debug)]
pub struct Terminal {
    output: Output,
    controller: u8,
    print_frames: bool,
    frames: usize,
}

impl Terminal {
    pub fn new(output: Output, controller: u8, print_frames: bool) -> Self {
        Terminal {
            output,
            controller,
            print_frames,
            frames: 0,
        }
    }

    /// Buffer commits seen so far.
    pub fn frames(&self) -> usize {
        self.frames
    }
}

impl Devices for Terminal {
    fn on_buffer_commit(&mut self, screen: &ScreenBuffer) {
        self.frames += 1;
        if self.print_frames {
            if self.output.is_minimal() {
                println!("FRAME {}", self.frames);
            } else {
                println!("{:>12} {}", "Frame".cyan(), self.frames);
            }
            self.output.print_screen(screen);
        }
    }

    fn poll_controller(&mut self) -> u8 {
        self.controller
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::Flags;

    fn state() -> MachineState {
        let mut registers = [0; NUM_REGISTERS];
        registers[3] = 8;
        MachineState {
            registers,
            pc: 4,
            flags: Flags {
                zero: false,
                carry: true,
            },
            stack: vec![2, 9],
            halted: false,
            cycle_count: 3,
            screen: ScreenBuffer::new(3, 2),
        }
    }

    #[test]
    fn minimal_state() {
        let text = Output::new(true).render_state(&state());
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), NUM_REGISTERS + 5);
        assert_eq!(lines[3], "R3 8");
        assert_eq!(&lines[16..], ["PC 4", "Z 0", "C 1", "STACK 2 9", "CYCLES 3"]);
        assert!(!text.contains('\x1b'));
    }

    #[test]
    fn minimal_screen() {
        let mut screen = ScreenBuffer::new(3, 2);
        screen.set(1, 0, true);
        screen.set(2, 1, true);
        assert_eq!(Output::new(true).render_screen(&screen), ".#.\n..#\n");
    }

    #[test]
    fn bits_grouped_by_field() {
        let layout = Instr::field_layout(0x1);
        assert_eq!(Output::new(true).render_bits(0x1105, &layout), "0001 0001 00000101");
        let layout = Instr::field_layout(0x0);
        assert_eq!(Output::new(true).render_bits(0x0000, &layout), "0000 000000000000");
        let layout = Instr::field_layout(0x2);
        assert_eq!(Output::new(true).render_bits(0x2123, &layout), "0010 0001 0010 0011");
    }

    #[test]
    fn terminal_counts_frames() {
        let mut term = Terminal::new(Output::new(true), 7, false);
        term.on_buffer_commit(&ScreenBuffer::new(1, 1));
        term.on_buffer_commit(&ScreenBuffer::new(1, 1));
        assert_eq!(term.frames(), 2);
        assert_eq!(term.poll_controller(), 7);
    }
}
