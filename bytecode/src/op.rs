/// Shape of a single operand as laid out in the byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// BER variable-length unsigned integer.
    Uint,
    /// BER length followed by that many raw bytes.
    Bytes,
    /// Four bytes, each exactly `0` or `1`.
    Flags,
}

/// How an instruction changes the operand stack depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackEffect {
    Fixed { pops: u32, pushes: u32 },
    /// Depends on operands, or on the argument count left on the stack by
    /// a preceding `push_argc`.
    Variadic,
}

const fn fixed(pops: u32, pushes: u32) -> StackEffect {
    StackEffect::Fixed { pops, pushes }
}

const VARIADIC: StackEffect = StackEffect::Variadic;

/// One row of the opcode table.
#[derive(Debug)]
pub struct OpInfo {
    pub op: Op,
    pub name: &'static str,
    pub code: u8,
    pub shape: &'static [OperandKind],
    pub effect: StackEffect,
}

macro_rules! opcodes {
    ($(
        $(#[$meta:meta])*
        $variant:ident = $code:literal, $name:literal, [$($kind:ident),*], $effect:expr;
    )*) => {
        /// Instruction opcodes. Numeric codes are contiguous from zero.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Op {
            $( $(#[$meta])* $variant = $code, )*
        }

        /// The opcode table, indexed by numeric code.
        pub static TABLE: &[OpInfo] = &[
            $(
                OpInfo {
                    op: Op::$variant,
                    name: $name,
                    code: $code,
                    shape: &[$(OperandKind::$kind),*],
                    effect: $effect,
                },
            )*
        ];

        impl Op {
            pub const COUNT: usize = [$($code),*].len();

            pub const fn from_u8(byte: u8) -> Option<Op> {
                match byte {
                    $( $code => Some(Op::$variant), )*
                    _ => None,
                }
            }
        }
    };
}

opcodes! {
    Nop = 0, "nop", [], fixed(0, 0);
    Pop = 1, "pop", [], fixed(1, 0);
    Dup = 2, "dup", [], fixed(1, 2);
    PushNil = 3, "push_nil", [], fixed(0, 1);
    PushTrue = 4, "push_true", [], fixed(0, 1);
    PushFalse = 5, "push_false", [], fixed(0, 1);
    PushSelf = 6, "push_self", [], fixed(0, 1);
    PushInt = 7, "push_int", [Uint], fixed(0, 1);
    /// Operand is the magnitude of a negative integer.
    PushNegInt = 8, "push_neg_int", [Uint], fixed(0, 1);
    /// Operand is the 8 little-endian bytes of an `f64`.
    PushFloat = 9, "push_float", [Bytes], fixed(0, 1);
    PushString = 10, "push_string", [Bytes], fixed(0, 1);
    PushSymbol = 11, "push_symbol", [Bytes], fixed(0, 1);
    /// Argument count consumed by the next `send` or `yield`.
    PushArgc = 12, "push_argc", [Uint], fixed(0, 1);

    /// Dynamic call. Flags: implicit self, has block, arguments
    /// pre-flattened into one array, trailing keyword hash.
    Send = 13, "send", [Bytes, Flags], VARIADIC;
    /// Call the frame's block. Same flag layout as `send`.
    Yield = 14, "yield", [Flags], VARIADIC;
    BlockGiven = 15, "block_given", [], fixed(0, 1);

    CreateArray = 16, "create_array", [Uint], VARIADIC;
    /// Operand is the number of key/value pairs.
    CreateHash = 17, "create_hash", [Uint], VARIADIC;
    ArrayConcat = 18, "array_concat", [], fixed(2, 1);
    /// Coerce the top of stack to an array for splatting.
    Splat = 19, "splat", [], fixed(1, 1);
    HashMerge = 20, "hash_merge", [], fixed(2, 1);
    Interpolate = 21, "interpolate", [Uint], VARIADIC;

    GetLocal = 22, "get_local", [Uint], fixed(0, 1);
    SetLocal = 23, "set_local", [Uint], fixed(1, 0);
    /// Operands: environment depth, index.
    GetEnv = 24, "get_env", [Uint, Uint], fixed(0, 1);
    SetEnv = 25, "set_env", [Uint, Uint], fixed(1, 0);
    /// Give the current frame a fresh environment of the given size.
    AllocEnv = 26, "alloc_env", [Uint], fixed(0, 0);
    GetIvar = 27, "get_ivar", [Bytes], fixed(0, 1);
    SetIvar = 28, "set_ivar", [Bytes], fixed(1, 0);
    GetGlobal = 29, "get_global", [Bytes], fixed(0, 1);
    SetGlobal = 30, "set_global", [Bytes], fixed(1, 0);
    GetConst = 31, "get_const", [Bytes], fixed(0, 1);
    SetConst = 32, "set_const", [Bytes], fixed(1, 0);

    /// Forward jump, offset relative to the end of the instruction.
    Jump = 33, "jump", [Uint], fixed(0, 0);
    JumpIf = 34, "jump_if", [Uint], fixed(1, 0);
    JumpUnless = 35, "jump_unless", [Uint], fixed(1, 0);
    JumpIfNil = 36, "jump_if_nil", [Uint], fixed(1, 0);
    /// Jump unless the value is the internal "argument absent" marker.
    JumpIfDefined = 37, "jump_if_defined", [Uint], fixed(1, 0);

    /// Loop region. Flags: until, body-first. Followed by the condition
    /// and body sub-regions.
    Loop = 38, "loop", [Flags, Uint, Uint], fixed(0, 1);
    /// Region restarted by `redo`.
    RedoScope = 39, "redo_scope", [Uint], fixed(0, 1);
    /// Protected region. Operands: body, rescue, else and ensure lengths.
    Protect = 40, "protect", [Uint, Uint, Uint, Uint], fixed(0, 1);
    /// `matcher === exception`, also accepting an array of matchers.
    RescueMatch = 41, "rescue_match", [], fixed(2, 1);
    Reraise = 42, "reraise", [], fixed(1, 1);

    Return = 43, "return", [], fixed(1, 1);
    Break = 44, "break", [], fixed(1, 1);
    LoopBreak = 45, "loop_break", [], fixed(1, 1);
    Next = 46, "next", [], fixed(1, 1);
    Redo = 47, "redo", [], fixed(0, 1);
    Retry = 48, "retry", [], fixed(0, 1);

    /// Bind the frame's incoming arguments, pushing one value per parameter.
    BindArgs = 49, "bind_args", [Bytes], VARIADIC;
    /// Destructure the array on top of the stack.
    BindArray = 50, "bind_array", [Bytes], VARIADIC;

    /// Operands: name, body length. The body follows inline.
    DefineMethod = 51, "define_method", [Bytes, Uint], fixed(0, 1);
    /// Flags: lambda. Operand: body length.
    DefineBlock = 52, "define_block", [Flags, Uint], fixed(0, 1);
    /// Operands: name, flags (has superclass, module), body length.
    DefineClass = 53, "define_class", [Bytes, Flags, Uint], VARIADIC;
}

impl Op {
    /// The table row for this opcode.
    pub fn info(self) -> &'static OpInfo {
        &TABLE[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn shape(self) -> &'static [OperandKind] {
        self.info().shape
    }

    /// Instructions that transfer control away and never fall through.
    pub const fn is_terminator(self) -> bool {
        matches!(
            self,
            Op::Return
                | Op::Break
                | Op::LoopBreak
                | Op::Next
                | Op::Redo
                | Op::Retry
                | Op::Reraise
        )
    }

    pub const fn is_jump(self) -> bool {
        matches!(
            self,
            Op::Jump | Op::JumpIf | Op::JumpUnless | Op::JumpIfNil | Op::JumpIfDefined
        )
    }

    pub fn from_name(name: &str) -> Option<Op> {
        TABLE.iter().find(|info| info.name == name).map(|info| info.op)
    }
}

impl TryFrom<u8> for Op {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        Op::from_u8(byte).ok_or(byte)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_contiguous_and_unique() {
        for (index, info) in TABLE.iter().enumerate() {
            assert_eq!(info.code as usize, index, "{}", info.name);
            assert_eq!(info.op as usize, index);
            assert_eq!(Op::from_u8(info.code), Some(info.op));
        }
        assert_eq!(Op::from_u8(Op::COUNT as u8), None);
    }

    #[test]
    fn names_are_unique() {
        for info in TABLE {
            assert_eq!(Op::from_name(info.name), Some(info.op));
        }
    }

    #[test]
    fn send_reserves_flag_block() {
        assert_eq!(Op::Send.shape(), &[OperandKind::Bytes, OperandKind::Flags]);
        assert_eq!(Op::try_from(255), Err(255));
    }
}
