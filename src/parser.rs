use std::num::{IntErrorKind, ParseIntError};

use tracing::{debug, trace};

use crate::{
    air::{Air, AirStmt, Instr},
    error::{AsmError, AsmErrorKind},
    isa::{self, Condition, Opcode, Register, Slot, INST_MEM_WORDS},
    lexer::{self, SourceLine, Statement, Token},
    symbol::{is_label_name, LabelTable, Span},
};

/// Output of a successful assembly run.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Assembly {
    air: Air,
    machine_code: Vec<u8>,
    log: Vec<String>,
    labels: LabelTable,
}

impl Assembly {
    /// Flat big-endian machine code, two bytes per instruction line.
    pub fn machine_code(&self) -> &[u8] {
        &self.machine_code
    }

    pub fn into_machine_code(self) -> Vec<u8> {
        self.machine_code
    }

    /// Human-readable record of both passes.
    pub fn log(&self) -> &[String] {
        &self.log
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    pub fn air(&self) -> &Air {
        &self.air
    }

    /// Source line that produced the word at `word_addr`.
    pub fn source_line(&self, word_addr: u16) -> Option<usize> {
        self.air.at_word(word_addr).map(|stmt| stmt.line)
    }

    /// Word address assembled from `line`, if that line holds an instruction.
    pub fn word_address(&self, line: usize) -> Option<u16> {
        self.air
            .iter()
            .position(|stmt| stmt.line == line)
            .map(|idx| idx as u16 + 1)
    }

    /// Location in the source of the instruction at `word_addr`.
    pub fn span_of(&self, word_addr: u16) -> Option<Span> {
        self.air.at_word(word_addr).map(|stmt| stmt.span)
    }
}

/// Assemble `src` into machine code. Stops at the first error.
pub fn assemble(src: &str) -> Result<Assembly, AsmError> {
    AsmParser::new(src).parse()
}

/// Two-pass assembler over line-oriented source
pub struct AsmParser<'a> {
    /// Reference to the source file
    src: &'a str,
    /// Processing log shared by both passes
    log: Vec<String>,
}

/// Error kind paired with the location it should be reported at.
type Located<T> = Result<T, (AsmErrorKind, Span)>;

impl<'a> AsmParser<'a> {
    pub fn new(src: &'a str) -> Self {
        AsmParser {
            src,
            log: Vec::new(),
        }
    }

    pub fn parse(mut self) -> Result<Assembly, AsmError> {
        let (labels, lines) = self.first_pass()?;
        let air = self.second_pass(&labels, &lines)?;
        self.log.push(String::new());
        self.log.push("--- Assembly Successful ---".to_string());
        debug!(words = air.len(), labels = labels.len(), "assembled program");

        Ok(Assembly {
            machine_code: air.to_bytes(),
            air,
            log: self.log,
            labels,
        })
    }

    fn error(&self, kind: AsmErrorKind, line: &SourceLine, span: Span) -> AsmError {
        AsmError::new(kind, line.number, span, self.src)
    }

    /// Collect labels and the lines that hold instructions.
    fn first_pass(&mut self) -> Result<(LabelTable, Vec<SourceLine<'a>>), AsmError> {
        self.log
            .push("--- Assembler: First Pass (1-based Word Addr) ---".to_string());
        let mut labels = LabelTable::new();
        let mut instrs = Vec::new();
        let mut word_addr: u32 = 1;

        for line in lexer::lines(self.src) {
            let Some(label) = line.label() else {
                instrs.push(line);
                word_addr += 1;
                continue;
            };

            let name = label.text.to_ascii_uppercase();
            if name.is_empty() {
                return Err(self.error(AsmErrorKind::EmptyLabel, &line, line.span));
            }
            let duplicate = |first| AsmErrorKind::DuplicateLabel {
                name: name.clone(),
                first,
            };
            if let Some(first) = labels.get(&name) {
                return Err(self.error(duplicate(first), &line, label.span));
            }
            if !is_label_name(&name) {
                return Err(self.error(
                    AsmErrorKind::InvalidLabelName(name.clone()),
                    &line,
                    label.span,
                ));
            }
            labels
                .insert(&name, word_addr)
                .map_err(|first| self.error(duplicate(first), &line, label.span))?;

            debug!(label = %name, word_addr, "found label");
            self.log
                .push(format!("Found label '{name}' at Word Addr {word_addr}"));
        }
        Ok((labels, instrs))
    }

    /// Encode every instruction line against the finished label table.
    fn second_pass(
        &mut self,
        labels: &LabelTable,
        lines: &[SourceLine<'a>],
    ) -> Result<Air, AsmError> {
        self.log.push(String::new());
        self.log
            .push("--- Assembler: Second Pass (1-based Word Addr) ---".to_string());
        let mut air = Air::new();

        for (idx, line) in lines.iter().enumerate() {
            let word_addr = idx + 1;
            self.log.push(format!(
                "Processing L{}: {} (@ Word Addr {word_addr})",
                line.number, line.text
            ));

            let stmt = line.statement();
            let (mnemonic, mut operands) =
                expand(&stmt).map_err(|(kind, span)| self.error(kind, line, span))?;
            let shown: Vec<&str> = operands.iter().map(|tok| tok.text).collect();
            self.log
                .push(format!(" -> Expanded/Base: {mnemonic} {}", shown.join(", ")));

            let opcode = lookup(&mnemonic)
                .map_err(|kind| self.error(kind, line, stmt.mnemonic.span))?;
            // LOD/STR offset defaults to 0
            if matches!(opcode, Opcode::Lod | Opcode::Str) && operands.len() == 2 {
                operands.push(Token {
                    text: "0",
                    span: stmt.mnemonic.span,
                });
            }
            let expected = opcode.operands().len();
            if operands.len() != expected {
                let kind = AsmErrorKind::OperandCount {
                    mnemonic: opcode.mnemonic().to_string(),
                    expected,
                    found: operands.len(),
                };
                return Err(self.error(kind, line, line.span));
            }

            let mut ops = Operands::new(&operands, labels);
            let instr = build(opcode, &mut ops)
                .map_err(|(kind, span)| self.error(kind, line, span))?;
            if !ops.resolved.is_empty() {
                self.log
                    .push(format!(" -> Resolved: {}", ops.resolved.join(", ")));
            }

            let word = instr.emit();
            let target = instr
                .target()
                .map_or_else(|| "N/A".to_string(), |t| t.to_string());
            self.log.push(format!(
                " -> Encoded: 0x{word:04x} (Target Word Addr: {target}) @ Byte Addr 0x{:04x}",
                idx * 2
            ));
            trace!(line = line.number, word_addr, word, "encoded");

            air.add_stmt(AirStmt {
                instr,
                line: line.number,
                span: line.span,
            });
        }
        Ok(air)
    }
}

/// Rewrite a pseudo-instruction into its base form. Real instructions pass through upper-cased.
fn expand<'s>(stmt: &Statement<'s>) -> Located<(String, Vec<Token<'s>>)> {
    let upper = stmt.mnemonic.text.to_ascii_uppercase();
    let Some(pseudo) = isa::pseudo(&upper) else {
        return Ok((upper, stmt.operands.clone()));
    };

    if stmt.operands.len() != pseudo.arity {
        let kind = AsmErrorKind::OperandCount {
            mnemonic: pseudo.name.to_string(),
            expected: pseudo.arity,
            found: stmt.operands.len(),
        };
        return Err((kind, stmt.mnemonic.span));
    }
    let operands = pseudo
        .template
        .iter()
        .map(|slot| match slot {
            Slot::Arg(i) => stmt.operands[*i],
            Slot::Fixed(text) => Token {
                text: *text,
                span: stmt.mnemonic.span,
            },
        })
        .collect();
    Ok((pseudo.target.to_string(), operands))
}

fn lookup(mnemonic: &str) -> Result<Opcode, AsmErrorKind> {
    mnemonic.parse::<Opcode>().map_err(|()| match isa::unavailable(mnemonic) {
        Some(taken_by) => AsmErrorKind::UnavailableOpcode {
            mnemonic: mnemonic.to_string(),
            taken_by,
        },
        None => AsmErrorKind::UnknownMnemonic(mnemonic.to_string()),
    })
}

/// Parse operands in source order so the leftmost bad operand is the one reported.
fn build(opcode: Opcode, ops: &mut Operands) -> Located<Instr> {
    Ok(match opcode {
        Opcode::Nop => Instr::Nop,
        Opcode::Ret => Instr::Ret,
        Opcode::Ldi => Instr::Ldi {
            dest: ops.reg(0)?,
            imm: ops.imm(1)?,
        },
        Opcode::Adi => Instr::Adi {
            reg: ops.reg(0)?,
            imm: ops.imm(1)?,
        },
        Opcode::Add => Instr::Add {
            a: ops.reg(0)?,
            b: ops.reg(1)?,
            dest: ops.reg(2)?,
        },
        Opcode::Sub => Instr::Sub {
            a: ops.reg(0)?,
            b: ops.reg(1)?,
            dest: ops.reg(2)?,
        },
        Opcode::Xor => Instr::Xor {
            a: ops.reg(0)?,
            b: ops.reg(1)?,
            dest: ops.reg(2)?,
        },
        Opcode::Rsh => Instr::Rsh {
            src: ops.reg(0)?,
            dest: ops.reg(1)?,
        },
        Opcode::Brh => Instr::Brh {
            cond: ops.cond(0)?,
            addr: ops.addr(1, opcode)?,
        },
        Opcode::Jmp => Instr::Jmp {
            addr: ops.addr(0, opcode)?,
        },
        Opcode::Cal => Instr::Cal {
            addr: ops.addr(0, opcode)?,
        },
        Opcode::Lod => Instr::Lod {
            base: ops.reg(0)?,
            reg: ops.reg(1)?,
            offset: ops.offset(2)?,
        },
        Opcode::Str => Instr::Str {
            base: ops.reg(0)?,
            reg: ops.reg(1)?,
            offset: ops.offset(2)?,
        },
    })
}

/// Typed access to an instruction's operand tokens. The count is checked beforehand.
struct Operands<'t, 's> {
    toks: &'t [Token<'s>],
    labels: &'t LabelTable,
    /// Resolved values, for the log
    resolved: Vec<String>,
}

impl<'t, 's> Operands<'t, 's> {
    fn new(toks: &'t [Token<'s>], labels: &'t LabelTable) -> Self {
        Operands {
            toks,
            labels,
            resolved: Vec::new(),
        }
    }

    fn reg(&mut self, i: usize) -> Located<Register> {
        let tok = self.toks[i];
        let reg = tok
            .text
            .parse::<Register>()
            .map_err(|()| (AsmErrorKind::InvalidRegister(upper(&tok)), tok.span))?;
        self.resolved.push(reg.to_string());
        Ok(reg)
    }

    fn cond(&mut self, i: usize) -> Located<Condition> {
        let tok = self.toks[i];
        let cond = tok
            .text
            .parse::<Condition>()
            .map_err(|()| (AsmErrorKind::InvalidCondition(upper(&tok)), tok.span))?;
        self.resolved.push(format!("{cond}={:02b}", cond as u8));
        Ok(cond)
    }

    /// -128..=255, kept as its low byte
    fn imm(&mut self, i: usize) -> Located<u8> {
        let tok = self.toks[i];
        let val = int(&tok, "immediate", AsmErrorKind::ImmediateOutOfRange)?;
        if !(-128..=255).contains(&val) {
            return Err((AsmErrorKind::ImmediateOutOfRange(upper(&tok)), tok.span));
        }
        self.resolved.push(val.to_string());
        Ok((val & 0xFF) as u8)
    }

    /// -8..=7
    fn offset(&mut self, i: usize) -> Located<i8> {
        let tok = self.toks[i];
        let val = int(&tok, "offset", AsmErrorKind::OffsetOutOfRange)?;
        if !(-8..=7).contains(&val) {
            return Err((AsmErrorKind::OffsetOutOfRange(upper(&tok)), tok.span));
        }
        self.resolved.push(val.to_string());
        Ok(val as i8)
    }

    /// Label or literal 1-based word address
    fn addr(&mut self, i: usize, opcode: Opcode) -> Located<u16> {
        let tok = self.toks[i];
        let target = match self.labels.get(tok.text) {
            Some(target) => {
                self.resolved.push(format!("{}={target}", upper(&tok)));
                target
            }
            None => {
                let val = match tok.text.parse::<i64>() {
                    Ok(val) => val,
                    Err(e) if overflowed(&e) => {
                        return Err((AsmErrorKind::AddressOutOfRange(upper(&tok)), tok.span));
                    }
                    Err(_) => return Err((AsmErrorKind::UndefinedLabel(upper(&tok)), tok.span)),
                };
                if !(1..=INST_MEM_WORDS as i64).contains(&val) {
                    return Err((AsmErrorKind::AddressOutOfRange(upper(&tok)), tok.span));
                }
                self.resolved.push(val.to_string());
                val as u32
            }
        };
        if !(1..=INST_MEM_WORDS as u32).contains(&target) {
            let kind = AsmErrorKind::TargetOutOfRange {
                mnemonic: opcode,
                target,
            };
            return Err((kind, tok.span));
        }
        Ok(target as u16)
    }
}

fn upper(tok: &Token) -> String {
    tok.text.to_ascii_uppercase()
}

/// Decimal literal with an optional sign. A literal too wide for `i64` is
/// reported through `range`.
fn int(tok: &Token, what: &'static str, range: fn(String) -> AsmErrorKind) -> Located<i64> {
    tok.text.parse::<i64>().map_err(|e| {
        let kind = if overflowed(&e) {
            range(upper(tok))
        } else {
            AsmErrorKind::InvalidInteger {
                what,
                text: upper(tok),
            }
        };
        (kind, tok.span)
    })
}

fn overflowed(e: &ParseIntError) -> bool {
    matches!(
        e.kind(),
        IntErrorKind::PosOverflow | IntErrorKind::NegOverflow
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;

    fn bytes(src: &str) -> Vec<u8> {
        assemble(src).unwrap().into_machine_code()
    }

    fn words(src: &str) -> Vec<u16> {
        bytes(src)
            .chunks_exact(2)
            .map(|w| u16::from_be_bytes([w[0], w[1]]))
            .collect()
    }

    fn err(src: &str) -> AsmError {
        assemble(src).unwrap_err()
    }

    #[test]
    fn assembles_basic_program() {
        let src = "LDI r1, 5\nLDI r2, 3\nADD r1, r2, r3";
        assert_eq!(bytes(src), vec![0x11, 0x05, 0x12, 0x03, 0x21, 0x23]);
    }

    #[test]
    fn one_word_per_instruction_line() {
        let src = "
            // header comment
            START:
            INC R1
            MOV R2, R1  // pseudo
            LOOP:
            CMP R1, R2
            BRH NE, LOOP
            RET
        ";
        let asm = assemble(src).unwrap();
        assert_eq!(asm.machine_code().len(), 5 * 2);
        assert_eq!(asm.labels().get("START"), Some(1));
        assert_eq!(asm.labels().get("LOOP"), Some(3));
    }

    #[test]
    fn assembly_is_deterministic() {
        let src = "A:\nLDI R1, 200\nADD R1, R1, R2\nJMP A";
        assert_eq!(assemble(src), assemble(src));
    }

    #[test]
    fn mnemonics_and_operands_are_case_insensitive() {
        assert_eq!(words("ldi r15, 255"), vec![0x1FFF]);
        assert_eq!(words("loop:\nbrh eq, Loop"), vec![0x4001]);
    }

    #[test]
    fn pseudo_instructions_expand() {
        assert_eq!(words("CMP R1, R2"), vec![0x3120]);
        // MOV a, b copies b into a
        assert_eq!(words("MOV R1, R2"), vec![0x2201]);
        assert_eq!(words("NEG R1, R2"), vec![0x3012]);
        assert_eq!(words("INC R3"), vec![0x9301]);
        assert_eq!(words("DEC R3"), vec![0x93FF]);
        assert_eq!(words("LSH R4, R5"), vec![0x2445]);
    }

    #[test]
    fn pseudo_with_wrong_arity() {
        let e = err("INC R1, R2");
        assert_eq!(e.category(), ErrorCategory::Syntax);
        assert!(e.to_string().contains("'INC' expects 1 operands, got 2"));
    }

    #[test]
    fn not_is_unavailable() {
        let e = err("NOT R1, R2");
        assert_eq!(e.category(), ErrorCategory::UnavailableOpcode);
        assert!(e.to_string().contains("NOR"));
    }

    #[test]
    fn reserved_mnemonics_are_unavailable() {
        for src in ["HLT", "nor R1, R2, R3", "AND R1, R2, R3"] {
            let e = err(src);
            assert_eq!(e.category(), ErrorCategory::UnavailableOpcode, "{src}");
            assert!(e.to_string().contains("unavailable due to opcode conflict"));
        }
    }

    #[test]
    fn unknown_mnemonic() {
        let e = err("NOP\nFOO R1");
        assert_eq!(e.line, 2);
        assert_eq!(e.kind, AsmErrorKind::UnknownMnemonic("FOO".into()));
    }

    #[test]
    fn lod_str_default_offset() {
        assert_eq!(words("LOD R1, R2"), vec![0xE120]);
        assert_eq!(words("STR R15, R8"), vec![0xFF80]);
        assert_eq!(words("STR R15, R8, -1"), vec![0xFF8F]);
    }

    #[test]
    fn operand_count_mismatch() {
        let e = err("ADD R1, R2");
        assert_eq!(
            e.kind,
            AsmErrorKind::OperandCount {
                mnemonic: "ADD".into(),
                expected: 3,
                found: 2
            }
        );
        assert!(assemble("RET R1").is_err());
    }

    #[test]
    fn immediate_range() {
        assert_eq!(words("LDI R1, -128"), vec![0x1180]);
        assert_eq!(words("LDI R1, 255"), vec![0x11FF]);
        let e = err("LDI R1, 256");
        assert_eq!(e.category(), ErrorCategory::OperandRange);
        let e = err("LDI R1, -129");
        assert_eq!(e.category(), ErrorCategory::OperandRange);
        let e = err("LDI R1, 0x10");
        assert_eq!(e.category(), ErrorCategory::Syntax);
    }

    #[test]
    fn offset_range() {
        assert_eq!(words("LOD R1, R2, -8"), vec![0xE128]);
        assert_eq!(err("LOD R1, R2, 8").category(), ErrorCategory::OperandRange);
        assert_eq!(err("LOD R1, R2, x").category(), ErrorCategory::Syntax);
    }

    #[test]
    fn oversized_literals_are_out_of_range() {
        let huge = "99999999999999999999999";
        assert_eq!(
            err(&format!("LDI R1, {huge}")).kind,
            AsmErrorKind::ImmediateOutOfRange(huge.into())
        );
        assert_eq!(
            err(&format!("LOD R1, R2, -{huge}")).kind,
            AsmErrorKind::OffsetOutOfRange(format!("-{huge}"))
        );
        assert_eq!(
            err(&format!("JMP {huge}")).kind,
            AsmErrorKind::AddressOutOfRange(huge.into())
        );
        assert_eq!(
            err("JMP NOWHERE").kind,
            AsmErrorKind::UndefinedLabel("NOWHERE".into())
        );
    }

    #[test]
    fn invalid_register_and_condition() {
        assert_eq!(
            err("ADD R1, R16, R2").kind,
            AsmErrorKind::InvalidRegister("R16".into())
        );
        assert_eq!(
            err("X:\nBRH GT, X").kind,
            AsmErrorKind::InvalidCondition("GT".into())
        );
    }

    #[test]
    fn first_bad_operand_is_reported() {
        let src = "ADD R1, R99, R77";
        let e = err(src);
        assert_eq!(&src[e.span().offs()..e.span().end()], "R99");
    }

    #[test]
    fn numeric_addresses() {
        assert_eq!(words("JMP 1"), vec![0x5001]);
        assert_eq!(words("CAL 1000"), vec![0xC3E8]);
        // 1024 keeps only its low 10 bits
        assert_eq!(words("JMP 1024"), vec![0x5000]);
        assert_eq!(err("JMP 0").category(), ErrorCategory::OperandRange);
        assert_eq!(err("JMP 1025").category(), ErrorCategory::OperandRange);
    }

    #[test]
    fn undefined_branch_label() {
        let e = err("BRH EQ, NOWHERE");
        assert_eq!(e.category(), ErrorCategory::Label);
        assert_eq!(e.kind, AsmErrorKind::UndefinedLabel("NOWHERE".into()));
    }

    #[test]
    fn label_past_instruction_memory() {
        let mut src = "JMP END\n".to_string();
        src.push_str(&"NOP\n".repeat(1024));
        src.push_str("END:\nNOP\n");
        let e = err(&src);
        assert_eq!(e.line, 1);
        assert_eq!(
            e.kind,
            AsmErrorKind::TargetOutOfRange {
                mnemonic: Opcode::Jmp,
                target: 1026
            }
        );
    }

    #[test]
    fn label_errors() {
        assert_eq!(err("  :  ").kind, AsmErrorKind::EmptyLabel);
        assert_eq!(
            err("A:\nNOP\na:").kind,
            AsmErrorKind::DuplicateLabel {
                name: "A".into(),
                first: 1
            }
        );
        assert_eq!(
            err("1ST:").kind,
            AsmErrorKind::InvalidLabelName("1ST".into())
        );
        assert_eq!(err("MY LABEL:").category(), ErrorCategory::Label);
    }

    #[test]
    fn label_sharing_a_line_is_not_a_label() {
        let e = err("LOOP: NOP");
        assert_eq!(e.kind, AsmErrorKind::UnknownMnemonic("LOOP:".into()));
    }

    #[test]
    fn first_pass_errors_come_first() {
        // Line 1 is a second pass error, line 2 a first pass one
        let e = err("FOO\nBAD NAME:");
        assert_eq!(e.line, 2);
        assert_eq!(e.category(), ErrorCategory::Label);
    }

    #[test]
    fn log_records_both_passes() {
        let asm = assemble("START:\nLDI R1, 5\nJMP START").unwrap();
        let log = asm.log();
        assert!(log.contains(&"Found label 'START' at Word Addr 1".to_string()));
        assert!(log.contains(&"Processing L2: LDI R1, 5 (@ Word Addr 1)".to_string()));
        assert!(log.contains(&" -> Expanded/Base: LDI R1, 5".to_string()));
        assert!(log.contains(&" -> Resolved: R1, 5".to_string()));
        assert!(log.contains(
            &" -> Encoded: 0x1105 (Target Word Addr: N/A) @ Byte Addr 0x0000".to_string()
        ));
        assert!(log.contains(
            &" -> Encoded: 0x5001 (Target Word Addr: 1) @ Byte Addr 0x0002".to_string()
        ));
        assert_eq!(log.last().map(String::as_str), Some("--- Assembly Successful ---"));
    }

    #[test]
    fn source_map_round_trips() {
        let asm = assemble("// c\nA:\nNOP\n\nINC R1\n").unwrap();
        assert_eq!(asm.source_line(1), Some(3));
        assert_eq!(asm.source_line(2), Some(5));
        assert_eq!(asm.source_line(3), None);
        assert_eq!(asm.word_address(5), Some(2));
        assert_eq!(asm.word_address(2), None);
    }

    #[test]
    fn empty_source_assembles_to_nothing() {
        let asm = assemble("\n// nothing\n").unwrap();
        assert!(asm.machine_code().is_empty());
        assert!(asm.labels().is_empty());
        assert!(asm.air().is_empty());
    }
}
