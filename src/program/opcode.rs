//! Append opcode numbering and instruction decoding.

use crate::core::{VmError, VmResult};

/// Width of every instruction in heap words.
pub const INSTRUCTION_SIZE: usize = 4;

macro_rules! opcodes {
    ($($name:ident = $id:expr),* $(,)?) => {
        /// Append VM opcodes.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        pub enum Op {
            $($name = $id),*
        }

        impl Op {
            pub fn from_word(word: u32) -> Option<Op> {
                match word {
                    $($id => Some(Op::$name),)*
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(Op::$name => stringify!($name),)*
                }
            }
        }
    };
}

opcodes! {
    Bug = 0,
    Helper = 1,
    Function = 2,
    SetVariable = 4,
    GetVariable = 5,
    GetProperty = 6,
    PushBlock = 7,
    GetBlock = 8,
    HasBlock = 9,
    HasBlockParams = 10,
    Concat = 11,
    Immediate = 12,
    Constant = 13,
    PrimitiveReference = 14,
    Dup = 15,
    Pop = 16,
    Load = 17,
    Fetch = 18,
    RootScope = 19,
    ChildScope = 20,
    PopScope = 21,
    Return = 22,
    ReturnTo = 23,
    Text = 24,
    Comment = 25,
    DynamicContent = 26,
    OpenElement = 27,
    OpenElementWithOperations = 28,
    OpenDynamicElement = 29,
    StaticAttr = 30,
    DynamicAttr = 31,
    ComponentAttr = 32,
    FlushElement = 33,
    CloseElement = 34,
    Modifier = 35,
    PushRemoteElement = 36,
    PopRemoteElement = 37,
    BindDynamicScope = 38,
    PushDynamicScope = 39,
    PopDynamicScope = 40,
    CompileDynamicBlock = 41,
    InvokeStatic = 42,
    InvokeDynamic = 43,
    Jump = 44,
    JumpIf = 45,
    JumpUnless = 46,
    PushFrame = 47,
    PopFrame = 48,
    Enter = 49,
    Exit = 50,
    Test = 51,
    EnterList = 52,
    ExitList = 53,
    PutIterator = 54,
    Iterate = 55,
    PushComponentManager = 56,
    PushDynamicComponentManager = 57,
    PushArgs = 58,
    PrepareArgs = 59,
    CreateComponent = 60,
    RegisterComponentDestructor = 61,
    PutComponentOperations = 62,
    GetComponentSelf = 63,
    GetComponentLayout = 64,
    BeginComponentTransaction = 65,
    CommitComponentTransaction = 66,
    DidCreateElement = 67,
    DidRenderLayout = 68,
    GetPartialTemplate = 69,
    ResolveMaybeLocal = 70,
    Debugger = 71,
}

/// A decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcode {
    pub op: Op,
    pub op1: u32,
    pub op2: u32,
    pub op3: u32,
}

impl Opcode {
    pub fn decode(words: [u32; 4], address: usize) -> VmResult<Opcode> {
        let op = Op::from_word(words[0]).ok_or(VmError::InvalidOpcode {
            word: words[0],
            address,
        })?;
        Ok(Opcode {
            op,
            op1: words[1],
            op2: words[2],
            op3: words[3],
        })
    }

    /// First operand as a signed jump offset.
    pub fn offset(&self) -> isize {
        self.op1 as i32 as isize
    }
}

/// Encoding of primitive literal operands: two flag bits above a 30-bit value.
pub mod primitive {
    pub const NUMBER: u32 = 0;
    pub const STRING: u32 = 1;
    pub const IMMEDIATE: u32 = 2;
    /// Number spelled out in the string pool.
    pub const FLOAT: u32 = 3;

    pub const FALSE: u32 = 0;
    pub const TRUE: u32 = 1;
    pub const NULL: u32 = 2;
    pub const UNDEFINED: u32 = 3;

    const FLAG_SHIFT: u32 = 30;
    const VALUE_MASK: u32 = !(3 << FLAG_SHIFT);

    pub fn encode(flag: u32, value: u32) -> u32 {
        (flag << FLAG_SHIFT) | (value & VALUE_MASK)
    }

    pub fn decode(operand: u32) -> (u32, u32) {
        (operand >> FLAG_SHIFT, operand & VALUE_MASK)
    }

    /// Largest number stored inline; larger or fractional numbers go
    /// through the string pool.
    pub const MAX_INLINE: u32 = VALUE_MASK;
}

/// Operand of `Test`: how a condition reference is turned into a boolean.
pub mod test_kind {
    /// Truthiness of the value, read once.
    pub const CONST: u32 = 0;
    /// The reference itself.
    pub const SIMPLE: u32 = 1;
    /// Truthiness, following the reference.
    pub const ENVIRONMENT: u32 = 2;
    /// Whether the value is a component definition.
    pub const COMPONENT: u32 = 3;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_ids() {
        assert_eq!(Op::from_word(1), Some(Op::Helper));
        assert_eq!(Op::from_word(71), Some(Op::Debugger));
        assert_eq!(Op::from_word(3), None);
        assert_eq!(Op::JumpUnless as u32, 46);
        assert_eq!(Op::Iterate.name(), "Iterate");
    }

    #[test]
    fn test_decode_rejects_unknown_words() {
        assert!(matches!(
            Opcode::decode([99, 0, 0, 0], 8),
            Err(VmError::InvalidOpcode { word: 99, address: 8 })
        ));
    }

    #[test]
    fn test_negative_offsets_round_trip() {
        let opcode = Opcode::decode([Op::Jump as u32, (-12i32) as u32, 0, 0], 0).unwrap();
        assert_eq!(opcode.offset(), -12);
    }

    #[test]
    fn test_primitive_encoding() {
        let operand = primitive::encode(primitive::STRING, 42);
        assert_eq!(primitive::decode(operand), (primitive::STRING, 42));
        let operand = primitive::encode(primitive::IMMEDIATE, primitive::UNDEFINED);
        assert_eq!(primitive::decode(operand), (2, 3));
    }
}
