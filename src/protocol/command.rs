use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;

use crate::core::{Error, Result};

/// FINS command codes (MRC/SRC pairs)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CommandCode {
    MemoryAreaRead = 0x0101,
    MemoryAreaWrite = 0x0102,
    MemoryAreaFill = 0x0103,
    MultipleMemoryAreaRead = 0x0104,
    MemoryAreaTransfer = 0x0105,
    ParameterAreaRead = 0x0201,
    ParameterAreaWrite = 0x0202,
    ParameterAreaFill = 0x0203,
    ProgramAreaRead = 0x0306,
    ProgramAreaWrite = 0x0307,
    ProgramAreaClear = 0x0308,
    Run = 0x0401,
    Stop = 0x0402,
    CpuUnitDataRead = 0x0501,
    ConnectionDataRead = 0x0502,
    CpuUnitStatusRead = 0x0601,
    CycleTimeRead = 0x0620,
    ClockRead = 0x0701,
    ClockWrite = 0x0702,
    MessageRead = 0x0920,
    AccessRightAcquire = 0x0C01,
    AccessRightForcedAcquire = 0x0C02,
    AccessRightRelease = 0x0C03,
    ErrorClear = 0x2101,
    ErrorLogRead = 0x2102,
    ErrorLogClear = 0x2103,
    WriteAccessLogRead = 0x2140,
    WriteAccessLogClear = 0x2141,
    FileNameRead = 0x2201,
    SingleFileRead = 0x2202,
    SingleFileWrite = 0x2203,
    FileMemoryFormat = 0x2204,
    FileDelete = 0x2205,
    FileCopy = 0x2207,
    FileNameChange = 0x2208,
    MemoryAreaFileTransfer = 0x220A,
    ParameterAreaFileTransfer = 0x220B,
    ProgramAreaFileTransfer = 0x220C,
    DirectoryCreateDelete = 0x2215,
    MemoryCassetteTransfer = 0x2220,
    ForcedSetReset = 0x2301,
    ForcedSetResetCancel = 0x2302,
    ConvertToCompowayF = 0x2803,
    ConvertToModbusRtu = 0x2804,
    ConvertToModbusAscii = 0x2805,
}

impl CommandCode {
    const ALL: [CommandCode; 45] = [
        CommandCode::MemoryAreaRead,
        CommandCode::MemoryAreaWrite,
        CommandCode::MemoryAreaFill,
        CommandCode::MultipleMemoryAreaRead,
        CommandCode::MemoryAreaTransfer,
        CommandCode::ParameterAreaRead,
        CommandCode::ParameterAreaWrite,
        CommandCode::ParameterAreaFill,
        CommandCode::ProgramAreaRead,
        CommandCode::ProgramAreaWrite,
        CommandCode::ProgramAreaClear,
        CommandCode::Run,
        CommandCode::Stop,
        CommandCode::CpuUnitDataRead,
        CommandCode::ConnectionDataRead,
        CommandCode::CpuUnitStatusRead,
        CommandCode::CycleTimeRead,
        CommandCode::ClockRead,
        CommandCode::ClockWrite,
        CommandCode::MessageRead,
        CommandCode::AccessRightAcquire,
        CommandCode::AccessRightForcedAcquire,
        CommandCode::AccessRightRelease,
        CommandCode::ErrorClear,
        CommandCode::ErrorLogRead,
        CommandCode::ErrorLogClear,
        CommandCode::WriteAccessLogRead,
        CommandCode::WriteAccessLogClear,
        CommandCode::FileNameRead,
        CommandCode::SingleFileRead,
        CommandCode::SingleFileWrite,
        CommandCode::FileMemoryFormat,
        CommandCode::FileDelete,
        CommandCode::FileCopy,
        CommandCode::FileNameChange,
        CommandCode::MemoryAreaFileTransfer,
        CommandCode::ParameterAreaFileTransfer,
        CommandCode::ProgramAreaFileTransfer,
        CommandCode::DirectoryCreateDelete,
        CommandCode::MemoryCassetteTransfer,
        CommandCode::ForcedSetReset,
        CommandCode::ForcedSetResetCancel,
        CommandCode::ConvertToCompowayF,
        CommandCode::ConvertToModbusRtu,
        CommandCode::ConvertToModbusAscii,
    ];

    /// Returns the two-byte wire value
    pub fn code(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for CommandCode {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self> {
        CommandCode::ALL
            .iter()
            .copied()
            .find(|c| c.code() == value)
            .ok_or_else(|| Error::malformed(format!("unknown command code {:#06x}", value)))
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({:#06x})", self, self.code())
    }
}

/// Extended memory bank number (0x00..=0x18)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct EmBank(u8);

impl EmBank {
    /// Highest bank number a CPU unit can expose
    pub const MAX: u8 = 0x18;

    /// Creates a bank selector, rejecting banks the protocol cannot address
    pub fn new(bank: u8) -> Result<Self> {
        if bank > Self::MAX {
            return Err(Error::config(format!(
                "EM bank {:#04x} out of range (max {:#04x})",
                bank,
                Self::MAX
            )));
        }
        Ok(EmBank(bank))
    }

    /// Returns the bank number
    pub fn number(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for EmBank {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        EmBank::new(value)
    }
}

impl From<EmBank> for u8 {
    fn from(bank: EmBank) -> u8 {
        bank.0
    }
}

/// Controller memory areas that can be addressed in a memory area command.
///
/// Word and bit access to the same storage use different area codes, so each
/// area appears once per access kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryArea {
    CioBit,
    WorkBit,
    HoldingBit,
    AuxiliaryBit,
    CioBitForced,
    WorkBitForced,
    HoldingBitForced,
    CioWord,
    WorkWord,
    HoldingWord,
    AuxiliaryWord,
    CioWordForced,
    WorkWordForced,
    HoldingWordForced,
    TimerCounterFlag,
    TimerCounterFlagForced,
    TimerCounterPv,
    DataMemoryBit,
    DataMemoryWord,
    ExtendedBit(EmBank),
    ExtendedWord(EmBank),
    EmCurrentBankBit,
    EmCurrentBankWord,
    TaskFlagBit,
    TaskFlagStatus,
    IndexRegister,
    DataRegister,
    ConditionFlags,
}

impl MemoryArea {
    /// Returns the one-byte area code sent on the wire
    pub fn code(self) -> u8 {
        match self {
            MemoryArea::CioBit => 0x30,
            MemoryArea::WorkBit => 0x31,
            MemoryArea::HoldingBit => 0x32,
            MemoryArea::AuxiliaryBit => 0x33,
            MemoryArea::CioBitForced => 0x70,
            MemoryArea::WorkBitForced => 0x71,
            MemoryArea::HoldingBitForced => 0x72,
            MemoryArea::CioWord => 0xB0,
            MemoryArea::WorkWord => 0xB1,
            MemoryArea::HoldingWord => 0xB2,
            MemoryArea::AuxiliaryWord => 0xB3,
            MemoryArea::CioWordForced => 0xF0,
            MemoryArea::WorkWordForced => 0xF1,
            MemoryArea::HoldingWordForced => 0xF2,
            MemoryArea::TimerCounterFlag => 0x09,
            MemoryArea::TimerCounterFlagForced => 0x49,
            MemoryArea::TimerCounterPv => 0x89,
            MemoryArea::DataMemoryBit => 0x02,
            MemoryArea::DataMemoryWord => 0x82,
            MemoryArea::ExtendedBit(bank) => match bank.0 {
                b @ 0x00..=0x0F => 0x20 + b,
                b => 0xE0 + (b - 0x10),
            },
            MemoryArea::ExtendedWord(bank) => match bank.0 {
                b @ 0x00..=0x0F => 0xA0 + b,
                b => 0x60 + (b - 0x10),
            },
            MemoryArea::EmCurrentBankBit => 0x0A,
            MemoryArea::EmCurrentBankWord => 0x98,
            MemoryArea::TaskFlagBit => 0x06,
            MemoryArea::TaskFlagStatus => 0x46,
            MemoryArea::IndexRegister => 0xDC,
            MemoryArea::DataRegister => 0xBC,
            MemoryArea::ConditionFlags => 0x07,
        }
    }

    /// Whether items in this area are single bits (one byte per item on the wire)
    pub fn is_bit_access(self) -> bool {
        matches!(
            self,
            MemoryArea::CioBit
                | MemoryArea::WorkBit
                | MemoryArea::HoldingBit
                | MemoryArea::AuxiliaryBit
                | MemoryArea::CioBitForced
                | MemoryArea::WorkBitForced
                | MemoryArea::HoldingBitForced
                | MemoryArea::TimerCounterFlag
                | MemoryArea::TimerCounterFlagForced
                | MemoryArea::DataMemoryBit
                | MemoryArea::ExtendedBit(_)
                | MemoryArea::EmCurrentBankBit
                | MemoryArea::TaskFlagBit
                | MemoryArea::TaskFlagStatus
                | MemoryArea::ConditionFlags
        )
    }

    /// Number of bytes one item occupies in a read response
    pub fn item_size(self) -> usize {
        match self {
            a if a.is_bit_access() => 1,
            MemoryArea::CioWordForced
            | MemoryArea::WorkWordForced
            | MemoryArea::HoldingWordForced
            | MemoryArea::IndexRegister => 4,
            _ => 2,
        }
    }

    /// Returns the bit-access area backed by the same storage
    pub fn bit_area(self) -> Option<MemoryArea> {
        match self {
            a if a.is_bit_access() => Some(a),
            MemoryArea::CioWord => Some(MemoryArea::CioBit),
            MemoryArea::WorkWord => Some(MemoryArea::WorkBit),
            MemoryArea::HoldingWord => Some(MemoryArea::HoldingBit),
            MemoryArea::AuxiliaryWord => Some(MemoryArea::AuxiliaryBit),
            MemoryArea::DataMemoryWord => Some(MemoryArea::DataMemoryBit),
            MemoryArea::ExtendedWord(bank) => Some(MemoryArea::ExtendedBit(bank)),
            MemoryArea::EmCurrentBankWord => Some(MemoryArea::EmCurrentBankBit),
            _ => None,
        }
    }

    /// Looks up a word area from its one-letter tag.
    ///
    /// `w` work, `c` CIO, `d` data memory, `h` holding.
    pub fn from_tag(tag: char) -> Result<MemoryArea> {
        match tag.to_ascii_lowercase() {
            'w' => Ok(MemoryArea::WorkWord),
            'c' => Ok(MemoryArea::CioWord),
            'd' => Ok(MemoryArea::DataMemoryWord),
            'h' => Ok(MemoryArea::HoldingWord),
            other => Err(Error::config(format!("unknown memory area tag '{}'", other))),
        }
    }
}

/// A location in controller memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    /// Memory area
    pub area: MemoryArea,
    /// Word offset within the area
    pub word: u16,
    /// Bit offset within the word (0 for word access)
    #[serde(default)]
    pub bit: u8,
}

impl Address {
    /// Address of a whole word
    pub fn word(area: MemoryArea, word: u16) -> Self {
        Address { area, word, bit: 0 }
    }

    /// Address of a single bit, using the bit variant of `area`
    pub fn bit(area: MemoryArea, word: u16, bit: u8) -> Result<Self> {
        if bit > 15 {
            return Err(Error::config(format!("bit offset {} out of range 0..=15", bit)));
        }
        let area = area.bit_area().ok_or_else(|| {
            Error::config(format!("{:?} has no bit-access variant", area))
        })?;
        Ok(Address { area, word, bit })
    }

    /// Address `count` words further on
    pub fn offset(self, count: u16) -> Self {
        Address {
            word: self.word.wrapping_add(count),
            ..self
        }
    }

    /// The 4-byte area + address prefix shared by memory area commands
    pub(crate) fn to_bytes(self) -> [u8; 4] {
        let [hi, lo] = self.word.to_be_bytes();
        [self.area.code(), hi, lo, self.bit]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.area.is_bit_access() {
            write!(f, "{:?}:{}.{:02}", self.area, self.word, self.bit)
        } else {
            write!(f, "{:?}:{}", self.area, self.word)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_code_lookup() {
        assert_eq!(CommandCode::MemoryAreaRead.code(), 0x0101);
        assert_eq!(CommandCode::try_from(0x0102).unwrap(), CommandCode::MemoryAreaWrite);
        assert_eq!(CommandCode::try_from(0x2805).unwrap(), CommandCode::ConvertToModbusAscii);
        assert!(CommandCode::try_from(0x9999).is_err());
    }

    #[test]
    fn test_area_codes() {
        assert_eq!(MemoryArea::DataMemoryWord.code(), 0x82);
        assert_eq!(MemoryArea::WorkBit.code(), 0x31);
        assert_eq!(MemoryArea::CioBitForced.code(), 0x70);
        assert_eq!(MemoryArea::ExtendedWord(EmBank::new(0x0C).unwrap()).code(), 0xAC);
        assert_eq!(MemoryArea::ExtendedWord(EmBank::new(0x12).unwrap()).code(), 0x62);
        assert_eq!(MemoryArea::ExtendedBit(EmBank::new(0x18).unwrap()).code(), 0xE8);
    }

    #[test]
    fn test_em_bank_validation() {
        assert!(EmBank::new(0x18).is_ok());
        assert!(EmBank::new(0x19).is_err());
    }

    #[test]
    fn test_area_tags() {
        assert_eq!(MemoryArea::from_tag('w').unwrap(), MemoryArea::WorkWord);
        assert_eq!(MemoryArea::from_tag('c').unwrap(), MemoryArea::CioWord);
        assert_eq!(MemoryArea::from_tag('D').unwrap(), MemoryArea::DataMemoryWord);
        assert_eq!(MemoryArea::from_tag('h').unwrap(), MemoryArea::HoldingWord);
        assert!(MemoryArea::from_tag('x').is_err());
    }

    #[test]
    fn test_bit_address() {
        let addr = Address::bit(MemoryArea::WorkWord, 29, 1).unwrap();
        assert_eq!(addr.area, MemoryArea::WorkBit);
        assert_eq!(addr.to_bytes(), [0x31, 0x00, 0x1D, 0x01]);
        assert!(Address::bit(MemoryArea::WorkWord, 29, 16).is_err());
        assert!(Address::bit(MemoryArea::TimerCounterPv, 0, 0).is_err());
    }

    #[test]
    fn test_word_address_bytes() {
        let addr = Address::word(MemoryArea::DataMemoryWord, 8500);
        assert_eq!(addr.to_bytes(), [0x82, 0x21, 0x34, 0x00]);
        assert_eq!(addr.offset(70).word, 8570);
    }

    #[test]
    fn test_item_sizes() {
        assert_eq!(MemoryArea::WorkBit.item_size(), 1);
        assert_eq!(MemoryArea::DataMemoryWord.item_size(), 2);
        assert_eq!(MemoryArea::IndexRegister.item_size(), 4);
    }
}
