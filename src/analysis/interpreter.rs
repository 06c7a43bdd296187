//! Transfer rules of the sources-and-usages interpretation.
//!
//! [`Interpreter`] is called by [`crate::analysis::Frame::execute`] once per operation
//! shape (constant push, copy, one/two/three/n-ary operation, return) and by the
//! analyzer at control-flow joins. Each rule:
//!
//! 1. records the executing instruction as a usage of every consumed value,
//! 2. derives the verifier-level kind of the result,
//! 3. names the executing instruction as the result's only source,
//! 4. folds the result literal when every operand is a literal.
//!
//! String concatenation gets special treatment: `new StringBuilder` starts an
//! accumulator literal that `<init>`/`append` calls extend and `toString` materializes,
//! and the `StringConcatFactory` call sites, `Intrinsics.stringPlus` and `String.concat`
//! fold directly when all their arguments are known.

use std::{collections::BTreeSet, rc::Rc};

use crate::{
    analysis::{
        folding,
        usages::UsageTable,
        value::{AbstractValue, BasicType, Constant, StringBuilderLiteral, ValueRef},
    },
    ir::{opcodes::*, Insn, InsnId, InsnKind, LdcValue, MethodDescriptor, Type},
};

const STRING_BUILDER: &str = "java/lang/StringBuilder";
const STRING_CONCAT_FACTORY: &str = "java/lang/invoke/StringConcatFactory";
const INTRINSICS: &str = "kotlin/jvm/internal/Intrinsics";

/// Transfer function state for one analysis run.
pub(crate) struct Interpreter<'a> {
    insns: &'a [Insn],
    usages: &'a mut UsageTable,
}

impl<'a> Interpreter<'a> {
    pub(crate) fn new(insns: &'a [Insn], usages: &'a mut UsageTable) -> Self {
        Interpreter { insns, usages }
    }

    fn make(
        &mut self,
        ty: BasicType,
        sources: BTreeSet<InsnId>,
        constant: Option<Constant>,
    ) -> ValueRef {
        Rc::new(AbstractValue {
            ty,
            sources,
            usages: self.usages.fresh(),
            constant,
        })
    }

    fn produced_by(&mut self, ty: BasicType, insn: &Insn, constant: Option<Constant>) -> ValueRef {
        self.make(ty, BTreeSet::from([insn.id()]), constant)
    }

    fn consume(&mut self, insn: &Insn, value: &AbstractValue) {
        self.usages.record(value.usages, insn.id());
    }

    /// A value of unknown kind with no producers.
    pub(crate) fn empty(&mut self) -> ValueRef {
        self.make(BasicType::Uninitialized, BTreeSet::new(), None)
    }

    /// A producer-less value of type `ty`, `None` for void.
    pub(crate) fn for_type(&mut self, ty: &Type) -> Option<ValueRef> {
        let basic = BasicType::of(ty)?;
        Some(self.make(basic, BTreeSet::new(), None))
    }

    /// Constant pushes, `GETSTATIC` and `NEW`.
    pub(crate) fn new_operation(&mut self, insn: &Insn) -> ValueRef {
        let (ty, constant) = match &insn.kind {
            InsnKind::Simple(op) => match *op {
                ACONST_NULL => (BasicType::Reference, Some(Constant::Null)),
                ICONST_M1..=ICONST_5 => (
                    BasicType::Int,
                    Some(Constant::Int(i32::from(*op) - i32::from(ICONST_0))),
                ),
                LCONST_0 | LCONST_1 => (
                    BasicType::Long,
                    Some(Constant::Long(i64::from(*op - LCONST_0))),
                ),
                FCONST_0..=FCONST_2 => (
                    BasicType::Float,
                    Some(Constant::Float(f32::from(*op - FCONST_0))),
                ),
                DCONST_0 | DCONST_1 => (
                    BasicType::Double,
                    Some(Constant::Double(f64::from(*op - DCONST_0))),
                ),
                _ => (BasicType::Uninitialized, None),
            },
            InsnKind::Int { operand, .. } => (BasicType::Int, Some(Constant::Int(*operand))),
            InsnKind::Ldc(value) => ldc_value(value),
            InsnKind::Field { desc, .. } => (type_of(desc), None),
            InsnKind::Type { desc, .. } => {
                let constant = (desc == STRING_BUILDER)
                    .then(|| Constant::Builder(StringBuilderLiteral::default()));
                (BasicType::Reference, constant)
            }
            _ => (BasicType::Uninitialized, None),
        };
        self.produced_by(ty, insn, constant)
    }

    /// Loads, stores and stack shuffles. `index` is the position of the copying instruction.
    pub(crate) fn copy_operation(&mut self, index: usize, value: &ValueRef) -> ValueRef {
        let insns = self.insns;
        let insn = &insns[index];
        self.consume(insn, value);
        let constant = match &value.constant {
            Some(Constant::Builder(builder)) if self.follows_builder_construction(index) => {
                Some(Constant::Builder(builder.clone()))
            }
            Some(Constant::Builder(builder)) => Some(Constant::Builder(builder.detached())),
            other => other.clone(),
        };
        self.produced_by(value.ty, insn, constant)
    }

    /// Whether the closest preceding real instruction is `NEW java/lang/StringBuilder`.
    fn follows_builder_construction(&self, index: usize) -> bool {
        self.insns[..index]
            .iter()
            .rev()
            .find(|insn| !insn.is_pseudo())
            .is_some_and(|insn| {
                matches!(
                    &insn.kind,
                    InsnKind::Type { opcode, desc } if *opcode == NEW && desc == STRING_BUILDER
                )
            })
    }

    /// One-operand instructions. Returns `None` for those that push nothing.
    pub(crate) fn unary_operation(&mut self, insn: &Insn, value: &ValueRef) -> Option<ValueRef> {
        self.consume(insn, value);
        let ty = match &insn.kind {
            InsnKind::Simple(op) => match *op {
                INEG | L2I | F2I | D2I | I2B | I2C | I2S | ARRAYLENGTH => BasicType::Int,
                FNEG | I2F | L2F | D2F => BasicType::Float,
                LNEG | I2L | F2L | D2L => BasicType::Long,
                DNEG | I2D | L2D | F2D => BasicType::Double,
                _ => return None,
            },
            InsnKind::Iinc { .. } => BasicType::Int,
            InsnKind::Field { opcode, desc, .. } if *opcode == GETFIELD => type_of(desc),
            InsnKind::Int { opcode, .. } if *opcode == NEWARRAY => BasicType::Reference,
            InsnKind::Type { opcode, .. } => match *opcode {
                ANEWARRAY | CHECKCAST => BasicType::Reference,
                INSTANCEOF => BasicType::Int,
                _ => return None,
            },
            _ => return None,
        };

        let constant = value.constant.as_ref().and_then(|constant| match &insn.kind {
            InsnKind::Simple(op) => folding::unary(*op, constant, 0),
            InsnKind::Iinc { incr, .. } => folding::unary(IINC, constant, i32::from(*incr)),
            _ => None,
        });
        Some(self.produced_by(ty, insn, constant))
    }

    /// Two-operand instructions. `value1` is the deeper operand.
    pub(crate) fn binary_operation(
        &mut self,
        insn: &Insn,
        value1: &ValueRef,
        value2: &ValueRef,
    ) -> Option<ValueRef> {
        self.consume(insn, value1);
        self.consume(insn, value2);
        let InsnKind::Simple(op) = insn.kind else {
            // IF_ICMPxx, IF_ACMPxx and PUTFIELD
            return None;
        };
        let ty = match op {
            IALOAD | BALOAD | CALOAD | SALOAD | IADD | ISUB | IMUL | IDIV | IREM | ISHL | ISHR
            | IUSHR | IAND | IOR | IXOR | LCMP | FCMPL | FCMPG | DCMPL | DCMPG => BasicType::Int,
            FALOAD | FADD | FSUB | FMUL | FDIV | FREM => BasicType::Float,
            LALOAD | LADD | LSUB | LMUL | LDIV | LREM | LSHL | LSHR | LUSHR | LAND | LOR
            | LXOR => BasicType::Long,
            DALOAD | DADD | DSUB | DMUL | DDIV | DREM => BasicType::Double,
            AALOAD => BasicType::Reference,
            _ => return None,
        };
        let constant = match (&value1.constant, &value2.constant) {
            (Some(c1), Some(c2)) => folding::binary(op, c1, c2),
            _ => None,
        };
        Some(self.produced_by(ty, insn, constant))
    }

    /// Array stores: consumes three values and pushes nothing.
    pub(crate) fn ternary_operation(
        &mut self,
        insn: &Insn,
        value1: &ValueRef,
        value2: &ValueRef,
        value3: &ValueRef,
    ) {
        self.consume(insn, value1);
        self.consume(insn, value2);
        self.consume(insn, value3);
    }

    /// Invocations and `MULTIANEWARRAY`. Returns `None` for void calls.
    pub(crate) fn nary_operation(&mut self, insn: &Insn, values: &[ValueRef]) -> Option<ValueRef> {
        for value in values {
            self.consume(insn, value);
        }

        // Builder constructors fold into the receiver even though they push nothing.
        let constant = if values.iter().all(|value| value.constant.is_some()) {
            fold_call(insn, values)
        } else {
            None
        };

        let ty = match &insn.kind {
            InsnKind::MultiANewArray { .. } => BasicType::Reference,
            InsnKind::Method { desc, .. } | InsnKind::InvokeDynamic { desc, .. } => {
                let return_type = desc.rfind(')').map_or("V", |pos| &desc[pos + 1..]);
                BasicType::of(&Type::parse(return_type).ok()?)?
            }
            _ => return None,
        };
        Some(self.produced_by(ty, insn, constant))
    }

    /// Value returns: the returned value is consumed by the return instruction.
    pub(crate) fn return_operation(&mut self, insn: &Insn, value: &ValueRef) {
        self.consume(insn, value);
    }

    /// Joins an existing frame value with an incoming one.
    ///
    /// The usage classes of both values are unified. The result carries the union of
    /// the sources, the common kind (or `Uninitialized`) and the literal only when both
    /// sides agree on it. When nothing changed the existing value is returned as is,
    /// preserving pointer identity.
    pub(crate) fn merge(&mut self, old: &ValueRef, incoming: &ValueRef) -> ValueRef {
        self.usages.union(old.usages, incoming.usages);
        if Rc::ptr_eq(old, incoming) {
            return old.clone();
        }

        let ty = if old.ty == incoming.ty {
            old.ty
        } else {
            BasicType::Uninitialized
        };
        let sources: BTreeSet<InsnId> = old.sources.union(&incoming.sources).copied().collect();
        let constant = match (&old.constant, &incoming.constant) {
            (Some(a), Some(b)) if a == b => Some(a.clone()),
            _ => None,
        };

        if ty == old.ty && sources == old.sources && constant == old.constant {
            return old.clone();
        }
        Rc::new(AbstractValue {
            ty,
            sources,
            usages: old.usages,
            constant,
        })
    }
}

fn type_of(desc: &str) -> BasicType {
    Type::parse(desc)
        .ok()
        .and_then(|ty| BasicType::of(&ty))
        .unwrap_or(BasicType::Uninitialized)
}

fn ldc_value(value: &LdcValue) -> (BasicType, Option<Constant>) {
    match value {
        LdcValue::Int(v) => (BasicType::Int, Some(Constant::Int(*v))),
        LdcValue::Float(v) => (BasicType::Float, Some(Constant::Float(*v))),
        LdcValue::Long(v) => (BasicType::Long, Some(Constant::Long(*v))),
        LdcValue::Double(v) => (BasicType::Double, Some(Constant::Double(*v))),
        LdcValue::String(s) => (BasicType::Reference, Some(Constant::string(s))),
        LdcValue::Class(c) => (BasicType::Reference, Some(Constant::Class(c.clone()))),
        LdcValue::MethodType(_) | LdcValue::Handle(_) => (BasicType::Reference, None),
        LdcValue::Dynamic { desc, .. } => (type_of(desc), None),
    }
}

fn builder_of(value: Option<&ValueRef>) -> Option<&StringBuilderLiteral> {
    match value?.constant.as_ref()? {
        Constant::Builder(builder) => Some(builder),
        _ => None,
    }
}

/// Folds string building and concatenation calls whose operands are all literals.
fn fold_call(insn: &Insn, values: &[ValueRef]) -> Option<Constant> {
    match &insn.kind {
        InsnKind::Method {
            owner, name, desc, ..
        } => match (owner.as_str(), name.as_str()) {
            (STRING_BUILDER, _) => fold_builder_call(name, desc, values),
            (INTRINSICS, "stringPlus")
                if desc == "(Ljava/lang/String;Ljava/lang/Object;)Ljava/lang/String;" =>
            {
                let left = folding::render(values.first()?.constant.as_ref()?)?;
                let right = folding::render(values.get(1)?.constant.as_ref()?)?;
                Some(Constant::string(&(left + &right)))
            }
            ("java/lang/String", "concat") if desc == "(Ljava/lang/String;)Ljava/lang/String;" => {
                let left = values.first()?.constant.as_ref()?.as_str()?;
                let right = values.get(1)?.constant.as_ref()?.as_str()?;
                Some(Constant::string(&format!("{}{}", left, right)))
            }
            _ => None,
        },
        InsnKind::InvokeDynamic {
            desc,
            bsm,
            bsm_args,
            ..
        } if bsm.owner == STRING_CONCAT_FACTORY => {
            let arguments = MethodDescriptor::parse(desc).ok()?.arguments;
            if arguments.len() != values.len() {
                return None;
            }
            let typed: Vec<(Type, Constant)> = arguments
                .into_iter()
                .zip(values)
                .map(|(ty, value)| Some((ty, value.constant.clone()?)))
                .collect::<Option<_>>()?;

            let text = match bsm.name.as_str() {
                "makeConcat" => typed
                    .iter()
                    .map(|(ty, value)| folding::render_as(value, ty))
                    .collect::<Option<String>>()?,
                "makeConcatWithConstants" => {
                    let LdcValue::String(recipe) = bsm_args.first()? else {
                        return None;
                    };
                    folding::concat_recipe(recipe, &typed, bsm_args)?
                }
                _ => return None,
            };
            Some(Constant::string(&text))
        }
        _ => None,
    }
}

fn fold_builder_call(name: &str, desc: &str, values: &[ValueRef]) -> Option<Constant> {
    let builder = builder_of(values.first())?;
    let argument = values.get(1).and_then(|value| value.constant.as_ref());

    match name {
        "<init>" => {
            if matches!(desc, "(Ljava/lang/String;)V" | "(Ljava/lang/CharSequence;)V") {
                builder.append(&folding::render(argument?)?);
            }
            None
        }
        "toString" if desc == "()Ljava/lang/String;" => Some(Constant::string(&builder.contents())),
        "append" => {
            let text = match desc {
                "(Ljava/lang/Object;)Ljava/lang/StringBuilder;"
                | "(Ljava/lang/String;)Ljava/lang/StringBuilder;"
                | "(Ljava/lang/CharSequence;)Ljava/lang/StringBuilder;"
                | "(I)Ljava/lang/StringBuilder;"
                | "(J)Ljava/lang/StringBuilder;"
                | "(F)Ljava/lang/StringBuilder;"
                | "(D)Ljava/lang/StringBuilder;"
                | "(S)Ljava/lang/StringBuilder;" => folding::render(argument?)?,
                "(Z)Ljava/lang/StringBuilder;" => (argument?.as_int()? != 0).to_string(),
                "(C)Ljava/lang/StringBuilder;" => {
                    String::from(folding::char_of(argument?.as_int()?)?)
                }
                _ => return None,
            };
            builder.append(&text);
            Some(Constant::Builder(builder.clone()))
        }
        _ => None,
    }
}
