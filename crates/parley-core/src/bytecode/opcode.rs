//! Bytecode instruction set for the Parley virtual machine

/// Bytecode operation codes
///
/// A stack-based instruction set: one opcode byte followed by a fixed,
/// opcode-specific operand width. Multi-byte operands are little-endian.
/// Operands named "symbol" index the chunk's symbol table, not the constant
/// pool, so a chunk links against other chunks by [`Symbol`](super::Symbol).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    // ===== Stack Operations =====
    /// Push a constant from the constant pool
    /// Operand: u16 constant index
    Constant = 0,

    /// Push `none`
    None = 1,

    /// Push `true`
    True = 2,

    /// Push `false`
    False = 3,

    /// Pop and discard the top of stack
    Pop = 4,

    // ===== Locals =====
    /// Push the value bound in a local slot, reading through a cell if the
    /// slot has been promoted
    /// Operand: u8 slot
    GetLocal = 5,

    /// Store the top of stack into a local slot (does not pop)
    /// Operand: u8 slot
    SetLocal = 6,

    /// Pop the top of stack into a fresh binding of a local slot
    /// Operand: u8 slot
    DefineLocal = 7,

    /// Pop the top of stack into a freshly allocated capture cell and bind
    /// the slot to that cell. Emitted in place of `DefineLocal` once the
    /// local is found to escape into a closure.
    /// Operand: u8 slot
    DefineCell = 8,

    // ===== Captures =====
    /// Push the value held by one of the closure's capture cells
    /// Operand: u8 capture index
    GetCapture = 9,

    /// Write the top of stack through a capture cell (does not pop)
    /// Operand: u8 capture index
    SetCapture = 10,

    // ===== Module Symbols =====
    /// Push a module value, running its lazy initializer on first access
    /// Operand: u16 symbol
    GetModuleValue = 11,

    /// Store the top of stack into a module value (does not pop)
    /// Operand: u16 symbol
    SetModuleValue = 12,

    /// Push a module-level function as a closure
    /// Operand: u16 symbol
    GetModuleFunction = 13,

    /// Push a struct type
    /// Operand: u16 symbol
    GetStruct = 14,

    /// Push a host builtin function
    /// Operand: u16 symbol
    GetBuiltin = 15,

    /// Push the receiver of the executing method
    GetSelf = 16,

    // ===== Functions =====
    /// Materialize a closure over a nested chunk, capturing cells as the
    /// chunk's capture list describes
    /// Operand: u16 symbol
    MakeClosure = 17,

    /// Call the value below the arguments
    /// Operand: u8 argument count
    Call = 18,

    /// Call a chunk directly by symbol with no arguments
    /// Operand: u16 symbol
    CallChunk = 19,

    /// Call a method on the receiver below the arguments
    /// Operands: u16 method symbol, u8 argument count
    InvokeMethod = 20,

    /// Replace the receiver on top of stack with a bound method
    /// Operand: u16 method symbol
    GetMethod = 21,

    /// Return the top of stack from the current frame
    Return = 22,

    // ===== Struct Instances =====
    /// Replace the instance on top of stack with one of its properties
    /// Operand: u8 property offset
    GetProperty = 23,

    /// Pop an instance and store the value below it into a property,
    /// leaving the value
    /// Operand: u8 property offset
    SetProperty = 24,

    // ===== Collections =====
    /// Pop N elements and push a new `Standard.Array`
    /// Operand: u16 element count
    InitArray = 25,

    /// Pop N key/value pairs and push a new `Standard.Dictionary`
    /// Operand: u16 entry count
    InitDict = 26,

    /// Pop receiver and index, push the element
    Get = 27,

    /// Pop receiver and index, store the value below them, leaving the value
    SetSubscript = 28,

    // ===== Arithmetic =====
    /// Add (ints), concatenate (strings) or offset (pointer + int)
    Add = 29,

    /// Subtract
    Subtract = 30,

    /// Multiply
    Multiply = 31,

    /// Truncating integer division
    Divide = 32,

    /// Remainder, sign follows the dividend
    Modulo = 33,

    /// Negate an int
    Negate = 34,

    /// Logical not
    Not = 35,

    // ===== Comparison =====
    /// Equal
    Equal = 36,

    /// Not equal
    NotEqual = 37,

    /// Less than
    Less = 38,

    /// Greater than
    Greater = 39,

    /// Less than or equal
    LessEqual = 40,

    /// Greater than or equal
    GreaterEqual = 41,

    // ===== Control Flow =====
    /// Unconditional forward jump
    /// Operand: i16 offset from the end of the instruction
    Jump = 42,

    /// Pop the condition and jump if it is falsy
    /// Operand: i16 offset from the end of the instruction
    JumpIfFalse = 43,

    /// Backward jump to a loop header
    /// Operand: i16 (negative) offset from the end of the instruction
    Loop = 44,

    // ===== Enum Cases =====
    /// Pop a value and push whether it is the given case of the given enum
    /// Operands: u16 enum symbol, u8 case index
    MatchCase = 45,

    /// Replace the enum case on top of stack with one of its associated
    /// values
    /// Operand: u8 value index
    GetAssociated = 46,
}

/// The shape of an opcode's operand bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// No operand
    None,
    /// u16 constant pool index
    Constant,
    /// u8 local slot
    Slot,
    /// u8 capture index
    Capture,
    /// u16 symbol table index
    Symbol,
    /// u8 argument count
    ArgCount,
    /// u16 element count
    Count,
    /// u8 property offset
    Property,
    /// i16 jump offset
    Jump,
    /// u16 symbol table index then u8 argument count
    Invoke,
    /// u16 enum symbol index then u8 case index
    Case,
    /// u8 associated value index
    Associated,
}

impl OpCode {
    /// Returns the size of this instruction in bytes (including operands)
    #[must_use]
    pub const fn size(self) -> usize {
        match self.operand_kind() {
            OperandKind::None => 1,
            OperandKind::Slot
            | OperandKind::Capture
            | OperandKind::ArgCount
            | OperandKind::Property
            | OperandKind::Associated => 2,
            OperandKind::Constant | OperandKind::Symbol | OperandKind::Count | OperandKind::Jump => {
                3
            }
            OperandKind::Invoke | OperandKind::Case => 4,
        }
    }

    /// Returns the operand layout of this opcode
    #[must_use]
    pub const fn operand_kind(self) -> OperandKind {
        match self {
            OpCode::Constant => OperandKind::Constant,

            OpCode::GetLocal | OpCode::SetLocal | OpCode::DefineLocal | OpCode::DefineCell => {
                OperandKind::Slot
            }

            OpCode::GetCapture | OpCode::SetCapture => OperandKind::Capture,

            OpCode::GetModuleValue
            | OpCode::SetModuleValue
            | OpCode::GetModuleFunction
            | OpCode::GetStruct
            | OpCode::GetBuiltin
            | OpCode::MakeClosure
            | OpCode::CallChunk
            | OpCode::GetMethod => OperandKind::Symbol,

            OpCode::Call => OperandKind::ArgCount,
            OpCode::InvokeMethod => OperandKind::Invoke,
            OpCode::GetProperty | OpCode::SetProperty => OperandKind::Property,
            OpCode::InitArray | OpCode::InitDict => OperandKind::Count,
            OpCode::Jump | OpCode::JumpIfFalse | OpCode::Loop => OperandKind::Jump,
            OpCode::MatchCase => OperandKind::Case,
            OpCode::GetAssociated => OperandKind::Associated,

            OpCode::None
            | OpCode::True
            | OpCode::False
            | OpCode::Pop
            | OpCode::GetSelf
            | OpCode::Return
            | OpCode::Get
            | OpCode::SetSubscript
            | OpCode::Add
            | OpCode::Subtract
            | OpCode::Multiply
            | OpCode::Divide
            | OpCode::Modulo
            | OpCode::Negate
            | OpCode::Not
            | OpCode::Equal
            | OpCode::NotEqual
            | OpCode::Less
            | OpCode::Greater
            | OpCode::LessEqual
            | OpCode::GreaterEqual => OperandKind::None,
        }
    }

    /// Net change in value-stack depth when this instruction executes
    ///
    /// `count` is the instruction's count operand (argument, element or entry
    /// count) and is ignored by other opcodes. `Return` reports the pop of its
    /// result; the frame ends there.
    #[must_use]
    pub const fn stack_effect(self, count: u16) -> i32 {
        let count = count as i32;
        match self {
            OpCode::Constant
            | OpCode::None
            | OpCode::True
            | OpCode::False
            | OpCode::GetLocal
            | OpCode::GetCapture
            | OpCode::GetModuleValue
            | OpCode::GetModuleFunction
            | OpCode::GetStruct
            | OpCode::GetBuiltin
            | OpCode::GetSelf
            | OpCode::MakeClosure
            | OpCode::CallChunk => 1,

            OpCode::SetLocal
            | OpCode::SetCapture
            | OpCode::SetModuleValue
            | OpCode::GetMethod
            | OpCode::GetProperty
            | OpCode::Negate
            | OpCode::Not
            | OpCode::Jump
            | OpCode::Loop
            | OpCode::MatchCase
            | OpCode::GetAssociated => 0,

            OpCode::Pop
            | OpCode::DefineLocal
            | OpCode::DefineCell
            | OpCode::Return
            | OpCode::SetProperty
            | OpCode::Get
            | OpCode::JumpIfFalse
            | OpCode::Add
            | OpCode::Subtract
            | OpCode::Multiply
            | OpCode::Divide
            | OpCode::Modulo
            | OpCode::Equal
            | OpCode::NotEqual
            | OpCode::Less
            | OpCode::Greater
            | OpCode::LessEqual
            | OpCode::GreaterEqual => -1,

            OpCode::SetSubscript => -2,

            // Callee (or receiver) and arguments replaced by the result
            OpCode::Call | OpCode::InvokeMethod => -count,

            OpCode::InitArray => 1 - count,
            OpCode::InitDict => 1 - 2 * count,
        }
    }

    /// Returns true for instructions that never fall through
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, OpCode::Return | OpCode::Jump | OpCode::Loop)
    }

    /// Returns the name of this opcode for disassembly
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            OpCode::Constant => "CONSTANT",
            OpCode::None => "NONE",
            OpCode::True => "TRUE",
            OpCode::False => "FALSE",
            OpCode::Pop => "POP",
            OpCode::GetLocal => "GET_LOCAL",
            OpCode::SetLocal => "SET_LOCAL",
            OpCode::DefineLocal => "DEFINE_LOCAL",
            OpCode::DefineCell => "DEFINE_CELL",
            OpCode::GetCapture => "GET_CAPTURE",
            OpCode::SetCapture => "SET_CAPTURE",
            OpCode::GetModuleValue => "GET_MODULE_VALUE",
            OpCode::SetModuleValue => "SET_MODULE_VALUE",
            OpCode::GetModuleFunction => "GET_MODULE_FUNCTION",
            OpCode::GetStruct => "GET_STRUCT",
            OpCode::GetBuiltin => "GET_BUILTIN",
            OpCode::GetSelf => "GET_SELF",
            OpCode::MakeClosure => "MAKE_CLOSURE",
            OpCode::Call => "CALL",
            OpCode::CallChunk => "CALL_CHUNK",
            OpCode::InvokeMethod => "INVOKE_METHOD",
            OpCode::GetMethod => "GET_METHOD",
            OpCode::Return => "RETURN",
            OpCode::GetProperty => "GET_PROPERTY",
            OpCode::SetProperty => "SET_PROPERTY",
            OpCode::InitArray => "INIT_ARRAY",
            OpCode::InitDict => "INIT_DICT",
            OpCode::Get => "GET",
            OpCode::SetSubscript => "SET_SUBSCRIPT",
            OpCode::Add => "ADD",
            OpCode::Subtract => "SUBTRACT",
            OpCode::Multiply => "MULTIPLY",
            OpCode::Divide => "DIVIDE",
            OpCode::Modulo => "MODULO",
            OpCode::Negate => "NEGATE",
            OpCode::Not => "NOT",
            OpCode::Equal => "EQUAL",
            OpCode::NotEqual => "NOT_EQUAL",
            OpCode::Less => "LESS",
            OpCode::Greater => "GREATER",
            OpCode::LessEqual => "LESS_EQUAL",
            OpCode::GreaterEqual => "GREATER_EQUAL",
            OpCode::Jump => "JUMP",
            OpCode::JumpIfFalse => "JUMP_IF_FALSE",
            OpCode::Loop => "LOOP",
            OpCode::MatchCase => "MATCH_CASE",
            OpCode::GetAssociated => "GET_ASSOCIATED",
        }
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl TryFrom<u8> for OpCode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0 => Ok(OpCode::Constant),
            1 => Ok(OpCode::None),
            2 => Ok(OpCode::True),
            3 => Ok(OpCode::False),
            4 => Ok(OpCode::Pop),
            5 => Ok(OpCode::GetLocal),
            6 => Ok(OpCode::SetLocal),
            7 => Ok(OpCode::DefineLocal),
            8 => Ok(OpCode::DefineCell),
            9 => Ok(OpCode::GetCapture),
            10 => Ok(OpCode::SetCapture),
            11 => Ok(OpCode::GetModuleValue),
            12 => Ok(OpCode::SetModuleValue),
            13 => Ok(OpCode::GetModuleFunction),
            14 => Ok(OpCode::GetStruct),
            15 => Ok(OpCode::GetBuiltin),
            16 => Ok(OpCode::GetSelf),
            17 => Ok(OpCode::MakeClosure),
            18 => Ok(OpCode::Call),
            19 => Ok(OpCode::CallChunk),
            20 => Ok(OpCode::InvokeMethod),
            21 => Ok(OpCode::GetMethod),
            22 => Ok(OpCode::Return),
            23 => Ok(OpCode::GetProperty),
            24 => Ok(OpCode::SetProperty),
            25 => Ok(OpCode::InitArray),
            26 => Ok(OpCode::InitDict),
            27 => Ok(OpCode::Get),
            28 => Ok(OpCode::SetSubscript),
            29 => Ok(OpCode::Add),
            30 => Ok(OpCode::Subtract),
            31 => Ok(OpCode::Multiply),
            32 => Ok(OpCode::Divide),
            33 => Ok(OpCode::Modulo),
            34 => Ok(OpCode::Negate),
            35 => Ok(OpCode::Not),
            36 => Ok(OpCode::Equal),
            37 => Ok(OpCode::NotEqual),
            38 => Ok(OpCode::Less),
            39 => Ok(OpCode::Greater),
            40 => Ok(OpCode::LessEqual),
            41 => Ok(OpCode::GreaterEqual),
            42 => Ok(OpCode::Jump),
            43 => Ok(OpCode::JumpIfFalse),
            44 => Ok(OpCode::Loop),
            45 => Ok(OpCode::MatchCase),
            46 => Ok(OpCode::GetAssociated),
            _ => Err(byte),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAST_OPCODE: u8 = OpCode::GetAssociated as u8;

    #[test]
    fn opcode_roundtrip() {
        for byte in 0..=LAST_OPCODE {
            let op = OpCode::try_from(byte).unwrap();
            assert_eq!(op as u8, byte);
        }
        assert_eq!(OpCode::try_from(LAST_OPCODE + 1), Err(LAST_OPCODE + 1));
    }

    #[test]
    fn opcode_size_consistency() {
        assert_eq!(OpCode::Pop.size(), 1);
        assert_eq!(OpCode::GetLocal.size(), 2);
        assert_eq!(OpCode::Constant.size(), 3);
        assert_eq!(OpCode::JumpIfFalse.size(), 3);
        assert_eq!(OpCode::InvokeMethod.size(), 4);
        assert_eq!(OpCode::MatchCase.size(), 4);
        assert_eq!(OpCode::GetAssociated.size(), 2);

        // DefineLocal is patched into DefineCell in place
        assert_eq!(OpCode::DefineLocal.size(), OpCode::DefineCell.size());
    }

    #[test]
    fn opcode_names() {
        assert_eq!(OpCode::GetModuleValue.name(), "GET_MODULE_VALUE");
        assert_eq!(format!("{}", OpCode::Return), "RETURN");
    }

    #[test]
    fn stack_effects() {
        assert_eq!(OpCode::Constant.stack_effect(0), 1);
        assert_eq!(OpCode::Add.stack_effect(0), -1);
        // callee + 2 args -> result
        assert_eq!(OpCode::Call.stack_effect(2), -2);
        // receiver + 0 args -> result
        assert_eq!(OpCode::InvokeMethod.stack_effect(0), 0);
        assert_eq!(OpCode::InitArray.stack_effect(3), -2);
        assert_eq!(OpCode::InitDict.stack_effect(2), -3);
        assert_eq!(OpCode::SetSubscript.stack_effect(0), -2);
        // Subject replaced by a bool
        assert_eq!(OpCode::MatchCase.stack_effect(0), 0);
    }
}
