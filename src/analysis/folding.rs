//! Constant folding rules.
//!
//! Arithmetic follows the fixed-width semantics of the JVM: integer operations wrap,
//! shift distances are masked to the operand width, float-to-integer conversions
//! saturate and map `NaN` to zero, and floating point follows IEEE-754. Integer
//! division or remainder by zero throws at run time, so it folds to nothing.
//!
//! String rendering matches `String.valueOf` for every literal kind, including the
//! `Float.toString` / `Double.toString` number format.

use crate::{
    analysis::value::Constant,
    ir::{opcodes::*, LdcValue, Type},
};

/// Folds a one-operand instruction. `IINC` passes its increment as `incr`.
pub(crate) fn unary(opcode: u8, value: &Constant, incr: i32) -> Option<Constant> {
    use Constant::{Double, Float, Int, Long};

    Some(match (opcode, value) {
        (INEG, Int(v)) => Int(v.wrapping_neg()),
        (LNEG, Long(v)) => Long(v.wrapping_neg()),
        (FNEG, Float(v)) => Float(-v),
        (DNEG, Double(v)) => Double(-v),
        (IINC, Int(v)) => Int(v.wrapping_add(incr)),
        (I2L, Int(v)) => Long(i64::from(*v)),
        (I2F, Int(v)) => Float(*v as f32),
        (I2D, Int(v)) => Double(f64::from(*v)),
        (L2I, Long(v)) => Int(*v as i32),
        (L2F, Long(v)) => Float(*v as f32),
        (L2D, Long(v)) => Double(*v as f64),
        (F2I, Float(v)) => Int(*v as i32),
        (F2L, Float(v)) => Long(*v as i64),
        (F2D, Float(v)) => Double(f64::from(*v)),
        (D2I, Double(v)) => Int(*v as i32),
        (D2L, Double(v)) => Long(*v as i64),
        (D2F, Double(v)) => Float(*v as f32),
        (I2B, Int(v)) => Int(i32::from(*v as i8)),
        (I2C, Int(v)) => Int(i32::from(*v as u16)),
        (I2S, Int(v)) => Int(i32::from(*v as i16)),
        _ => return None,
    })
}

fn compare<T: PartialOrd>(a: T, b: T, nan_result: i32) -> i32 {
    if a < b {
        -1
    } else if a > b {
        1
    } else if a == b {
        0
    } else {
        nan_result
    }
}

/// Folds a two-operand instruction. `value1` is the deeper operand.
pub(crate) fn binary(opcode: u8, value1: &Constant, value2: &Constant) -> Option<Constant> {
    use Constant::{Double, Float, Int, Long};

    Some(match (opcode, value1, value2) {
        (IADD, Int(a), Int(b)) => Int(a.wrapping_add(*b)),
        (LADD, Long(a), Long(b)) => Long(a.wrapping_add(*b)),
        (FADD, Float(a), Float(b)) => Float(a + b),
        (DADD, Double(a), Double(b)) => Double(a + b),
        (ISUB, Int(a), Int(b)) => Int(a.wrapping_sub(*b)),
        (LSUB, Long(a), Long(b)) => Long(a.wrapping_sub(*b)),
        (FSUB, Float(a), Float(b)) => Float(a - b),
        (DSUB, Double(a), Double(b)) => Double(a - b),
        (IMUL, Int(a), Int(b)) => Int(a.wrapping_mul(*b)),
        (LMUL, Long(a), Long(b)) => Long(a.wrapping_mul(*b)),
        (FMUL, Float(a), Float(b)) => Float(a * b),
        (DMUL, Double(a), Double(b)) => Double(a * b),
        (IDIV, Int(a), Int(b)) => Int(a.checked_div(*b).or_else(|| wrap_min(*a, *b))?),
        (LDIV, Long(a), Long(b)) => Long(a.checked_div(*b).or_else(|| wrap_min(*a, *b))?),
        (FDIV, Float(a), Float(b)) => Float(a / b),
        (DDIV, Double(a), Double(b)) => Double(a / b),
        (IREM, Int(a), Int(b)) if *b != 0 => Int(a.wrapping_rem(*b)),
        (LREM, Long(a), Long(b)) if *b != 0 => Long(a.wrapping_rem(*b)),
        (FREM, Float(a), Float(b)) => Float(a % b),
        (DREM, Double(a), Double(b)) => Double(a % b),
        (ISHL, Int(a), Int(b)) => Int(a.wrapping_shl(*b as u32)),
        (LSHL, Long(a), Int(b)) => Long(a.wrapping_shl(*b as u32)),
        (ISHR, Int(a), Int(b)) => Int(a.wrapping_shr(*b as u32)),
        (LSHR, Long(a), Int(b)) => Long(a.wrapping_shr(*b as u32)),
        (IUSHR, Int(a), Int(b)) => Int((*a as u32).wrapping_shr(*b as u32) as i32),
        (LUSHR, Long(a), Int(b)) => Long((*a as u64).wrapping_shr(*b as u32) as i64),
        (IAND, Int(a), Int(b)) => Int(a & b),
        (LAND, Long(a), Long(b)) => Long(a & b),
        (IOR, Int(a), Int(b)) => Int(a | b),
        (LOR, Long(a), Long(b)) => Long(a | b),
        (IXOR, Int(a), Int(b)) => Int(a ^ b),
        (LXOR, Long(a), Long(b)) => Long(a ^ b),
        (LCMP, Long(a), Long(b)) => Int(compare(a, b, 0)),
        (FCMPL, Float(a), Float(b)) => Int(compare(a, b, -1)),
        (FCMPG, Float(a), Float(b)) => Int(compare(a, b, 1)),
        (DCMPL, Double(a), Double(b)) => Int(compare(a, b, -1)),
        (DCMPG, Double(a), Double(b)) => Int(compare(a, b, 1)),
        _ => return None,
    })
}

/// `MIN / -1` overflows back to `MIN` on the JVM; only a zero divisor is unfoldable.
fn wrap_min<T>(a: T, b: T) -> Option<T>
where
    T: PartialEq + Default,
{
    if b == T::default() {
        None
    } else {
        Some(a)
    }
}

/// `Float.toString`.
#[must_use]
pub fn java_float_to_string(value: f32) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let magnitude = value.abs();
    if value == 0.0 || (1.0e-3..1.0e7).contains(&magnitude) {
        plain_decimal(format!("{}", value))
    } else {
        scientific(format!("{:e}", value))
    }
}

/// `Double.toString`.
#[must_use]
pub fn java_double_to_string(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let magnitude = value.abs();
    if value == 0.0 || (1.0e-3..1.0e7).contains(&magnitude) {
        plain_decimal(format!("{}", value))
    } else {
        scientific(format!("{:e}", value))
    }
}

fn plain_decimal(mut text: String) -> String {
    if !text.contains('.') {
        text.push_str(".0");
    }
    text
}

fn scientific(text: String) -> String {
    match text.split_once('e') {
        Some((mantissa, exponent)) if mantissa.contains('.') => {
            format!("{}E{}", mantissa, exponent)
        }
        Some((mantissa, exponent)) => format!("{}.0E{}", mantissa, exponent),
        None => text,
    }
}

/// `String.valueOf` of a literal, `None` where the text is not statically known.
pub(crate) fn render(value: &Constant) -> Option<String> {
    Some(match value {
        Constant::Int(v) => v.to_string(),
        Constant::Long(v) => v.to_string(),
        Constant::Float(v) => java_float_to_string(*v),
        Constant::Double(v) => java_double_to_string(*v),
        Constant::String(s) => s.to_string(),
        Constant::Null => "null".to_string(),
        Constant::Builder(b) => b.contents(),
        Constant::Class(_) => return None,
    })
}

/// Renders `value` as a concatenation argument declared with type `ty`.
pub(crate) fn render_as(value: &Constant, ty: &Type) -> Option<String> {
    match (ty, value) {
        (Type::Boolean, Constant::Int(v)) => Some((*v != 0).to_string()),
        (Type::Char, Constant::Int(v)) => char_of(*v).map(String::from),
        _ => render(value),
    }
}

/// The UTF-16 unit `value` as a `char`, `None` for lone surrogates.
pub(crate) fn char_of(value: i32) -> Option<char> {
    char::from_u32(u32::from(value as u16))
}

fn render_ldc(value: &LdcValue) -> Option<String> {
    Some(match value {
        LdcValue::Int(v) => v.to_string(),
        LdcValue::Long(v) => v.to_string(),
        LdcValue::Float(v) => java_float_to_string(*v),
        LdcValue::Double(v) => java_double_to_string(*v),
        LdcValue::String(s) => s.clone(),
        _ => return None,
    })
}

/// Expands a `StringConcatFactory.makeConcatWithConstants` recipe.
///
/// `\u{1}` takes the next dynamic argument and `\u{2}` the next static constant; the
/// recipe itself is the first bootstrap argument, so constants start at index 1.
pub(crate) fn concat_recipe(
    recipe: &str,
    arguments: &[(Type, Constant)],
    bsm_args: &[LdcValue],
) -> Option<String> {
    let mut result = String::with_capacity(recipe.len());
    let mut next_arg = arguments.iter();
    let mut next_cst = bsm_args.iter().skip(1);
    for c in recipe.chars() {
        match c {
            '\u{1}' => {
                let (ty, value) = next_arg.next()?;
                result.push_str(&render_as(value, ty)?);
            }
            '\u{2}' => result.push_str(&render_ldc(next_cst.next()?)?),
            other => result.push(other),
        }
    }
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_arithmetic_wraps() {
        assert_eq!(
            binary(IADD, &Constant::Int(i32::MAX), &Constant::Int(1)),
            Some(Constant::Int(i32::MIN))
        );
        assert_eq!(
            binary(IDIV, &Constant::Int(i32::MIN), &Constant::Int(-1)),
            Some(Constant::Int(i32::MIN))
        );
        assert_eq!(binary(IDIV, &Constant::Int(1), &Constant::Int(0)), None);
        assert_eq!(binary(LREM, &Constant::Long(1), &Constant::Long(0)), None);
        assert_eq!(
            binary(IREM, &Constant::Int(-7), &Constant::Int(3)),
            Some(Constant::Int(-1))
        );
    }

    #[test]
    fn test_shifts_are_masked() {
        assert_eq!(
            binary(ISHL, &Constant::Int(1), &Constant::Int(33)),
            Some(Constant::Int(2))
        );
        assert_eq!(
            binary(IUSHR, &Constant::Int(-1), &Constant::Int(28)),
            Some(Constant::Int(15))
        );
        assert_eq!(
            binary(LSHR, &Constant::Long(-16), &Constant::Int(2)),
            Some(Constant::Long(-4))
        );
        assert_eq!(binary(LSHL, &Constant::Long(1), &Constant::Long(1)), None);
    }

    #[test]
    fn test_nan_comparisons_differ_by_suffix() {
        let nan = Constant::Float(f32::NAN);
        let one = Constant::Float(1.0);
        assert_eq!(binary(FCMPL, &nan, &one), Some(Constant::Int(-1)));
        assert_eq!(binary(FCMPG, &nan, &one), Some(Constant::Int(1)));
        let dnan = Constant::Double(f64::NAN);
        assert_eq!(binary(DCMPL, &Constant::Double(0.0), &dnan), Some(Constant::Int(-1)));
        assert_eq!(binary(DCMPG, &Constant::Double(0.0), &dnan), Some(Constant::Int(1)));
        assert_eq!(
            binary(LCMP, &Constant::Long(3), &Constant::Long(2)),
            Some(Constant::Int(1))
        );
    }

    #[test]
    fn test_conversions() {
        assert_eq!(unary(I2B, &Constant::Int(200), 0), Some(Constant::Int(-56)));
        assert_eq!(unary(I2C, &Constant::Int(-1), 0), Some(Constant::Int(0xFFFF)));
        assert_eq!(unary(I2S, &Constant::Int(40000), 0), Some(Constant::Int(-25536)));
        assert_eq!(unary(F2I, &Constant::Float(f32::NAN), 0), Some(Constant::Int(0)));
        assert_eq!(
            unary(D2L, &Constant::Double(1e300), 0),
            Some(Constant::Long(i64::MAX))
        );
        assert_eq!(unary(IINC, &Constant::Int(4), -5), Some(Constant::Int(-1)));
        assert_eq!(unary(INEG, &Constant::Long(1), 0), None);
    }

    #[test]
    fn test_java_number_format() {
        assert_eq!(java_double_to_string(1.0), "1.0");
        assert_eq!(java_double_to_string(0.5), "0.5");
        assert_eq!(java_double_to_string(-0.0), "-0.0");
        assert_eq!(java_double_to_string(1.0e7), "1.0E7");
        assert_eq!(java_double_to_string(1.5e-5), "1.5E-5");
        assert_eq!(java_double_to_string(123456.789), "123456.789");
        assert_eq!(java_float_to_string(0.1), "0.1");
        assert_eq!(java_float_to_string(f32::NEG_INFINITY), "-Infinity");
        assert_eq!(java_float_to_string(3.0e10), "3.0E10");
    }

    #[test]
    fn test_concat_recipe() {
        let args = vec![
            (Type::object("java/lang/String"), Constant::string("n=")),
            (Type::Int, Constant::Int(4)),
            (Type::Boolean, Constant::Int(1)),
            (Type::Char, Constant::Int('!' as i32)),
        ];
        let bsm_args = vec![
            LdcValue::String("\u{1}\u{1}/\u{2}/\u{1}\u{1}".into()),
            LdcValue::Long(7),
        ];
        assert_eq!(
            concat_recipe("\u{1}\u{1}/\u{2}/\u{1}\u{1}", &args, &bsm_args).as_deref(),
            Some("n=4/7/true!")
        );
        assert_eq!(concat_recipe("\u{1}", &[], &bsm_args), None);
    }
}
