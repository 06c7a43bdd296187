//! Human-readable listings of method bodies.
//!
//! [`MethodListing`] renders a method the way bytecode viewers usually do: labels
//! numbered `L0`, `L1`, ... in order of appearance, one instruction per line, followed by
//! the exception table and the local-variable table. Listings are used for failure
//! dumps and by the command-line front end.

use std::{collections::HashMap, fmt};

use crate::ir::{opcodes, Insn, InsnKind, LabelId, LdcValue, Method};

/// Display adapter for one method.
pub struct MethodListing<'a> {
    owner: &'a str,
    method: &'a Method,
    labels: HashMap<LabelId, usize>,
}

impl<'a> MethodListing<'a> {
    /// Prepares a listing of `method` declared in `owner`.
    #[must_use]
    pub fn new(owner: &'a str, method: &'a Method) -> Self {
        let labels = method
            .instructions
            .iter()
            .filter_map(|insn| match insn.kind {
                InsnKind::Label(label) => Some(label),
                _ => None,
            })
            .enumerate()
            .map(|(n, label)| (label, n))
            .collect();

        MethodListing {
            owner,
            method,
            labels,
        }
    }

    fn label(&self, label: LabelId) -> String {
        match self.labels.get(&label) {
            Some(n) => format!("L{}", n),
            None => format!("L?{:?}", label),
        }
    }

    fn write_insn(&self, f: &mut fmt::Formatter<'_>, insn: &Insn) -> fmt::Result {
        let name = insn.opcode().map(opcodes::mnemonic).unwrap_or_default();
        match &insn.kind {
            InsnKind::Label(label) => writeln!(f, "   {}", self.label(*label)),
            InsnKind::LineNumber { line, start } => {
                writeln!(f, "    LINENUMBER {} {}", line, self.label(*start))
            }
            InsnKind::Simple(_) => writeln!(f, "    {}", name),
            InsnKind::Int { operand, .. } => writeln!(f, "    {} {}", name, operand),
            InsnKind::Var { var, .. } => writeln!(f, "    {} {}", name, var),
            InsnKind::Type { desc, .. } => writeln!(f, "    {} {}", name, desc),
            InsnKind::Field {
                owner, name: field, desc, ..
            } => writeln!(f, "    {} {}.{} : {}", name, owner, field, desc),
            InsnKind::Method {
                owner,
                name: member,
                desc,
                is_interface,
                ..
            } => {
                let itf = if *is_interface { " (itf)" } else { "" };
                writeln!(f, "    {} {}.{}{}{}", name, owner, member, desc, itf)
            }
            InsnKind::InvokeDynamic {
                name: site,
                desc,
                bsm,
                bsm_args,
            } => {
                writeln!(f, "    {} {}{} [", name, site, desc)?;
                writeln!(f, "      {}.{}{}", bsm.owner, bsm.name, bsm.desc)?;
                for arg in bsm_args {
                    writeln!(f, "      {}", LdcDisplay(arg))?;
                }
                writeln!(f, "    ]")
            }
            InsnKind::Jump { target, .. } => writeln!(f, "    {} {}", name, self.label(*target)),
            InsnKind::Ldc(value) => writeln!(f, "    {} {}", name, LdcDisplay(value)),
            InsnKind::Iinc { var, incr } => writeln!(f, "    {} {} {}", name, var, incr),
            InsnKind::TableSwitch {
                min,
                default,
                targets,
                ..
            } => {
                writeln!(f, "    {}", name)?;
                for (key, target) in (*min..).zip(targets) {
                    writeln!(f, "      {}: {}", key, self.label(*target))?;
                }
                writeln!(f, "      default: {}", self.label(*default))
            }
            InsnKind::LookupSwitch {
                default,
                keys,
                targets,
            } => {
                writeln!(f, "    {}", name)?;
                for (key, target) in keys.iter().zip(targets) {
                    writeln!(f, "      {}: {}", key, self.label(*target))?;
                }
                writeln!(f, "      default: {}", self.label(*default))
            }
            InsnKind::MultiANewArray { desc, dims } => {
                writeln!(f, "    {} {} {}", name, desc, dims)
            }
        }
    }
}

struct LdcDisplay<'a>(&'a LdcValue);

impl fmt::Display for LdcDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            LdcValue::Int(v) => write!(f, "{}", v),
            LdcValue::Float(v) => write!(f, "{}F", v),
            LdcValue::Long(v) => write!(f, "{}L", v),
            LdcValue::Double(v) => write!(f, "{}D", v),
            LdcValue::String(s) => write!(f, "{:?}", s),
            LdcValue::Class(c) => write!(f, "{}.class", c),
            LdcValue::MethodType(d) => write!(f, "{}", d),
            LdcValue::Handle(h) => write!(f, "{}.{}{} ({})", h.owner, h.name, h.desc, h.kind),
            LdcValue::Dynamic { name, desc, .. } => write!(f, "{} : {}", name, desc),
        }
    }
}

impl fmt::Display for MethodListing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let method = self.method;
        writeln!(
            f,
            "// {}.{}{} (access 0x{:04x})",
            self.owner,
            method.name,
            method.desc,
            method.access.bits()
        )?;
        for insn in &method.instructions {
            self.write_insn(f, insn)?;
        }
        for tcb in &method.try_catch_blocks {
            writeln!(
                f,
                "    TRYCATCHBLOCK {} {} {} {}",
                self.label(tcb.start),
                self.label(tcb.end),
                self.label(tcb.handler),
                tcb.catch_type.as_deref().unwrap_or("null")
            )?;
        }
        for local in &method.local_variables {
            writeln!(
                f,
                "    LOCALVARIABLE {} {} {} {} {}",
                local.name,
                local.desc,
                self.label(local.start),
                self.label(local.end),
                local.index
            )?;
        }
        let max_stack = method
            .max_stack
            .map_or_else(|| "?".to_string(), |s| s.to_string());
        writeln!(f, "    MAXSTACK = {}", max_stack)?;
        writeln!(f, "    MAXLOCALS = {}", method.max_locals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{MethodAccess, TryCatchBlock};

    #[test]
    fn test_listing_names_labels_in_order() {
        let (a, b) = (LabelId::new(), LabelId::new());
        let mut method = Method::new(MethodAccess::STATIC, "run", "()V");
        method.instructions.extend([
            Insn::label(a),
            Insn::ldc(LdcValue::String("hi".into())),
            Insn::method(
                opcodes::INVOKESTATIC,
                "kotlin/io/ConsoleKt",
                "println",
                "(Ljava/lang/Object;)V",
            ),
            Insn::label(b),
            Insn::simple(opcodes::RETURN),
        ]);
        method.try_catch_blocks.push(TryCatchBlock {
            start: a,
            end: b,
            handler: b,
            catch_type: None,
        });
        method.max_locals = 0;

        let text = MethodListing::new("Main", &method).to_string();
        assert!(text.contains("// Main.run()V"));
        assert!(text.contains("   L0\n    LDC \"hi\"\n"));
        assert!(text.contains("INVOKESTATIC kotlin/io/ConsoleKt.println(Ljava/lang/Object;)V"));
        assert!(text.contains("TRYCATCHBLOCK L0 L1 L1 null"));
        assert!(text.contains("MAXSTACK = ?"));
    }
}
