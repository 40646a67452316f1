//! Error types for the assembler adapter.
//!
//! The assembler back-end reports failures as a dense numeric code.
//! [`ErrorKind`] is the closed taxonomy those codes are translated into;
//! [`ErrorKind::Unknown`] absorbs every code the engine does not recognize,
//! so the translation is total and a back-end upgrade can never produce an
//! unrepresentable failure.

use thiserror::Error;

/// Result of one assembly attempt: the encoded bytes, or a translated error.
pub type CompileResult = std::result::Result<Vec<u8>, CompileError>;

/// A failed assembly attempt.
///
/// `line` is reported by the back-end where available; Keystone does not
/// track line numbers, so it is currently always 0.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("assembly failed at line {line}: {message}")]
pub struct CompileError {
    pub kind: ErrorKind,
    pub line: u32,
    pub message: String,
}

impl CompileError {
    /// Builds an error of the given kind carrying its canonical message.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            line: 0,
            message: kind.message().to_string(),
        }
    }

    /// Translates a raw back-end error code.
    pub(crate) fn from_backend_code(code: u32) -> Self {
        Self::new(ErrorKind::from_backend_code(code))
    }
}

/// The closed set of assembler failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Ok,
    OutOfMemory,
    InvalidArgument,
    InvalidState,
    InvalidArch,
    NotInitialized,
    AlreadyInitialized,
    FeatureDisabled,
    SlotOccupied,
    NoCodeGenerated,
    CodeTooLarge,
    InvalidLabel,
    LabelIndexOverflow,
    LabelAlreadyBound,
    LabelAlreadyDefined,
    LabelNameTooLong,
    InvalidLabelName,
    InvalidParentLabel,
    NonLocalLabelCantHaveParent,
    RelocationIndexOverflow,
    InvalidRelocationEntry,
    InvalidInstruction,
    InvalidRegisterType,
    InvalidRegisterKind,
    InvalidRegisterPhysicalId,
    InvalidRegisterVirtualId,
    InvalidPrefixCombination,
    InvalidLockPrefix,
    InvalidXAcquirePrefix,
    InvalidXReleasePrefix,
    InvalidRepPrefix,
    InvalidRexPrefix,
    InvalidMask,
    InvalidUseSingle,
    InvalidUseDouble,
    InvalidBroadcast,
    InvalidOption,
    InvalidAddress,
    InvalidAddressIndex,
    InvalidAddressScale,
    InvalidUseOf64BitAddress,
    InvalidDisplacement,
    InvalidSegment,
    InvalidImmediateValue,
    InvalidOperandSize,
    AmbiguousOperandSize,
    OperandSizeMismatch,
    InvalidTypeInfo,
    InvalidUseOf8BitRegister,
    InvalidUseOf64BitRegister,
    InvalidUseOf80BitFloat,
    NotConsecutiveRegisters,
    NoPhysicalRegisters,
    OverlappedRegisters,
    OverlappingRegisterAndArgsRegister,
    Unknown,
}

impl ErrorKind {
    /// Canonical human-readable message for this kind.
    pub fn message(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::OutOfMemory => "out of memory",
            Self::InvalidArgument => "invalid argument",
            Self::InvalidState => "invalid state",
            Self::InvalidArch => "invalid architecture",
            Self::NotInitialized => "not initialized",
            Self::AlreadyInitialized => "already initialized",
            Self::FeatureDisabled => "feature disabled",
            Self::SlotOccupied => "slot occupied",
            Self::NoCodeGenerated => "no code generated",
            Self::CodeTooLarge => "code too large",
            Self::InvalidLabel => "invalid label",
            Self::LabelIndexOverflow => "label index overflow",
            Self::LabelAlreadyBound => "label already bound",
            Self::LabelAlreadyDefined => "label already defined",
            Self::LabelNameTooLong => "label name too long",
            Self::InvalidLabelName => "invalid label name",
            Self::InvalidParentLabel => "invalid parent label",
            Self::NonLocalLabelCantHaveParent => "non-local label can't have a parent",
            Self::RelocationIndexOverflow => "relocation index overflow",
            Self::InvalidRelocationEntry => "invalid relocation entry",
            Self::InvalidInstruction => "invalid instruction",
            Self::InvalidRegisterType => "invalid register type",
            Self::InvalidRegisterKind => "invalid register kind",
            Self::InvalidRegisterPhysicalId => "invalid register physical id",
            Self::InvalidRegisterVirtualId => "invalid register virtual id",
            Self::InvalidPrefixCombination => "invalid prefix combination",
            Self::InvalidLockPrefix => "invalid lock prefix",
            Self::InvalidXAcquirePrefix => "invalid xacquire prefix",
            Self::InvalidXReleasePrefix => "invalid xrelease prefix",
            Self::InvalidRepPrefix => "invalid rep prefix",
            Self::InvalidRexPrefix => "invalid rex prefix",
            Self::InvalidMask => "invalid mask",
            Self::InvalidUseSingle => "invalid use of {1tox}",
            Self::InvalidUseDouble => "invalid use of {1to2}",
            Self::InvalidBroadcast => "invalid broadcast",
            Self::InvalidOption => "invalid option",
            Self::InvalidAddress => "invalid address",
            Self::InvalidAddressIndex => "invalid address index",
            Self::InvalidAddressScale => "invalid address scale",
            Self::InvalidUseOf64BitAddress => "invalid use of 64-bit address",
            Self::InvalidDisplacement => "invalid displacement",
            Self::InvalidSegment => "invalid segment",
            Self::InvalidImmediateValue => "invalid immediate value",
            Self::InvalidOperandSize => "invalid operand size",
            Self::AmbiguousOperandSize => "ambiguous operand size",
            Self::OperandSizeMismatch => "operand size mismatch",
            Self::InvalidTypeInfo => "invalid type info",
            Self::InvalidUseOf8BitRegister => "invalid use of 8-bit register",
            Self::InvalidUseOf64BitRegister => "invalid use of 64-bit register",
            Self::InvalidUseOf80BitFloat => "invalid use of 80-bit float",
            Self::NotConsecutiveRegisters => "not consecutive registers",
            Self::NoPhysicalRegisters => "no physical registers",
            Self::OverlappedRegisters => "overlapped registers",
            Self::OverlappingRegisterAndArgsRegister => "overlapping register and args register",
            Self::Unknown => "unknown error",
        }
    }

    /// Total translation from the Keystone engine's `ks_err` code space.
    ///
    /// The interesting codes are mapped onto the closest kind in the
    /// taxonomy; everything else collapses to [`ErrorKind::Unknown`].
    pub fn from_backend_code(code: u32) -> Self {
        match code {
            // Generic engine errors.
            0 => Self::Ok,
            1 => Self::OutOfMemory,           // KS_ERR_NOMEM
            2 => Self::InvalidArch,           // KS_ERR_ARCH
            3 => Self::InvalidState,          // KS_ERR_HANDLE
            4 => Self::InvalidArch,           // KS_ERR_MODE
            5 => Self::InvalidState,          // KS_ERR_VERSION
            6 => Self::InvalidOption,         // KS_ERR_OPT_INVALID
            // Parser errors.
            136 => Self::InvalidImmediateValue, // KS_ERR_ASM_DIRECTIVE_FPOINT
            140 => Self::InvalidOption,         // KS_ERR_ASM_VARIANT_INVALID
            141 => Self::InvalidAddress,        // KS_ERR_ASM_EXPR_BRACKET
            142 => Self::InvalidLabelName,      // KS_ERR_ASM_SYMBOL_MODIFIER
            143 => Self::LabelAlreadyDefined,   // KS_ERR_ASM_SYMBOL_REDEFINED
            144 => Self::InvalidLabel,          // KS_ERR_ASM_SYMBOL_MISSING
            147 => Self::InvalidInstruction,    // KS_ERR_ASM_UNSUPPORTED
            159 => Self::InvalidInstruction,    // KS_ERR_ASM_TOKEN_INVALID
            160 => Self::InvalidInstruction,    // KS_ERR_ASM_INSN_UNSUPPORTED
            161 => Self::InvalidRelocationEntry, // KS_ERR_ASM_FIXUP_INVALID
            162 => Self::InvalidLabel,          // KS_ERR_ASM_LABEL_INVALID
            163 => Self::InvalidState,          // KS_ERR_ASM_FRAGMENT_INVALID
            // Architecture-specific errors.
            512 => Self::InvalidArgument,    // KS_ERR_ASM_INVALIDOPERAND
            513 => Self::FeatureDisabled,    // KS_ERR_ASM_MISSINGFEATURE
            514 => Self::InvalidInstruction, // KS_ERR_ASM_MNEMONICFAIL
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}
