//! The bytecode instruction set: a fixed 5-byte `Instruction` and the
//! `CodeObject` it's packed into. Opcode numbering matches the reference
//! implementation's `OpCode(IntEnum)` exactly, since it is part of the
//! on-disk `.klc` contract this rewrite must stay compatible with.

use std::fmt;

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Nop = 0,
    PopTop = 1,
    DupTop = 2,
    RotTwo = 3,

    LoadConst = 10,

    LoadName = 20,
    StoreName = 21,
    LoadGlobal = 22,
    StoreGlobal = 23,
    DeleteName = 24,
    StoreNameDefine = 25,

    LoadAttr = 30,
    StoreAttr = 31,

    LoadIndex = 35,
    StoreIndex = 36,
    DeleteIndex = 37,

    BinaryAdd = 40,
    BinarySub = 41,
    BinaryMul = 42,
    BinaryDiv = 43,
    BinaryFloorDiv = 44,
    BinaryMod = 45,
    BinaryPow = 46,

    AugAdd = 50,
    AugSub = 51,
    AugMul = 52,
    AugDiv = 53,
    AugFloorDiv = 54,
    AugPow = 55,
    AugMod = 56,

    UnaryNeg = 60,
    UnaryPos = 61,
    UnaryNot = 62,

    CompareEq = 70,
    CompareNotEq = 71,
    CompareLt = 72,
    CompareGt = 73,
    CompareLtEq = 74,
    CompareGtEq = 75,
    CompareIn = 76,
    CompareIs = 77,

    JumpAbsolute = 80,
    JumpIfFalse = 81,
    JumpIfTrue = 82,
    JumpIfFalseOrPop = 83,
    JumpIfTrueOrPop = 84,

    GetIter = 90,
    ForIter = 91,
    BreakLoop = 92,
    ContinueLoop = 93,

    MakeFunction = 100,
    CallFunction = 101,
    CallFunctionKw = 102,
    ReturnValue = 103,

    MakeClass = 110,

    BuildList = 120,
    BuildDict = 121,
    BuildFstring = 125,
    BuildTuple = 126,
    BuildSlice = 127,

    SetupTry = 130,
    PopTry = 131,
    Raise = 132,
    EndFinally = 133,
    MatchException = 134,

    ImportModule = 140,
    ImportFrom = 141,

    DeclareGlobal = 150,

    UnpackSequence = 160,
}

impl OpCode {
    pub fn from_u8(b: u8) -> Option<OpCode> {
        use OpCode::*;
        Some(match b {
            0 => Nop,
            1 => PopTop,
            2 => DupTop,
            3 => RotTwo,
            10 => LoadConst,
            20 => LoadName,
            21 => StoreName,
            22 => LoadGlobal,
            23 => StoreGlobal,
            24 => DeleteName,
            25 => StoreNameDefine,
            30 => LoadAttr,
            31 => StoreAttr,
            35 => LoadIndex,
            36 => StoreIndex,
            37 => DeleteIndex,
            40 => BinaryAdd,
            41 => BinarySub,
            42 => BinaryMul,
            43 => BinaryDiv,
            44 => BinaryFloorDiv,
            45 => BinaryMod,
            46 => BinaryPow,
            50 => AugAdd,
            51 => AugSub,
            52 => AugMul,
            53 => AugDiv,
            54 => AugFloorDiv,
            55 => AugPow,
            56 => AugMod,
            60 => UnaryNeg,
            61 => UnaryPos,
            62 => UnaryNot,
            70 => CompareEq,
            71 => CompareNotEq,
            72 => CompareLt,
            73 => CompareGt,
            74 => CompareLtEq,
            75 => CompareGtEq,
            76 => CompareIn,
            77 => CompareIs,
            80 => JumpAbsolute,
            81 => JumpIfFalse,
            82 => JumpIfTrue,
            83 => JumpIfFalseOrPop,
            84 => JumpIfTrueOrPop,
            90 => GetIter,
            91 => ForIter,
            92 => BreakLoop,
            93 => ContinueLoop,
            100 => MakeFunction,
            101 => CallFunction,
            102 => CallFunctionKw,
            103 => ReturnValue,
            110 => MakeClass,
            120 => BuildList,
            121 => BuildDict,
            125 => BuildFstring,
            126 => BuildTuple,
            127 => BuildSlice,
            130 => SetupTry,
            131 => PopTry,
            132 => Raise,
            133 => EndFinally,
            134 => MatchException,
            140 => ImportModule,
            141 => ImportFrom,
            150 => DeclareGlobal,
            160 => UnpackSequence,
            _ => return None,
        })
    }
}

/// Fixed 5-byte instruction: `{opcode: u8, arg: i16, line: u16}`. `arg` is
/// signed so `MATCH_EXCEPTION -1` (bare except) is representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: OpCode,
    pub arg: i16,
    pub line: u16,
}

impl Instruction {
    pub fn new(opcode: OpCode, arg: i16, line: u16) -> Self {
        Instruction { opcode, arg, line }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}", self.opcode, self.arg)
    }
}

/// A compiled unit: a module, function, method, lambda, or class body.
#[derive(Debug, Clone)]
pub struct CodeObject {
    pub name: String,
    pub constants: Vec<Value>,
    pub names: Vec<String>,
    pub param_names: Vec<String>,
    pub param_count: u32,
    pub var_args: Option<String>,
    pub kw_args: Option<String>,
    pub instructions: Vec<Instruction>,
}

impl CodeObject {
    pub fn new(name: impl Into<String>) -> Self {
        CodeObject {
            name: name.into(),
            constants: Vec::new(),
            names: Vec::new(),
            param_names: Vec::new(),
            param_count: 0,
            var_args: None,
            kw_args: None,
            instructions: Vec::new(),
        }
    }

    pub fn current_offset(&self) -> usize {
        self.instructions.len()
    }

    /// Deduplicates scalar constants by `(type, equality)`; collections and
    /// nested `CodeObject`s are never deduplicated (appended fresh), matching
    /// the language's data-model invariant.
    pub fn add_const(&mut self, value: Value) -> Result<i16, String> {
        if is_dedup_candidate(&value) {
            if let Some(idx) = self.constants.iter().position(|c| c.kilat_eq(&value)) {
                return i16::try_from(idx).map_err(|_| "terlalu banyak pemalar".to_string());
            }
        }
        let idx = self.constants.len();
        self.constants.push(value);
        i16::try_from(idx).map_err(|_| "terlalu banyak pemalar".to_string())
    }

    pub fn add_name(&mut self, name: &str) -> Result<i16, String> {
        if let Some(idx) = self.names.iter().position(|n| n == name) {
            return i16::try_from(idx).map_err(|_| "terlalu banyak nama".to_string());
        }
        let idx = self.names.len();
        self.names.push(name.to_string());
        i16::try_from(idx).map_err(|_| "terlalu banyak nama".to_string())
    }
}

fn is_dedup_candidate(v: &Value) -> bool {
    matches!(v, Value::None | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_))
}
