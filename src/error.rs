//! Closed error taxonomy shared by every public operation.
//!
//! The numeric values are part of the SDK contract and match the codes
//! reported by the vendor library, so they can be passed across an FFI or
//! logged and compared with vendor documentation.

/// Result alias used by every public SDK operation.
pub type Result<T> = std::result::Result<T, ErrorCode>;

/// SDK error codes.
///
/// `NoError` exists so that a call outcome can always be expressed as exactly
/// one code (see [`ErrorCode::of`]); it is never returned inside an `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[repr(i32)]
pub enum ErrorCode {
    #[error("No error has occurred")]
    NoError = 0,

    #[error("Unhandled internal exception")]
    UnhandledException = 1,

    #[error("Invalid device handle")]
    BadDevHandle = 2,

    #[error("This function cannot be used with this device")]
    BadDevType = 3,

    #[error("Insufficient permission to access this device")]
    UsbDevNoPermission = 4,

    #[error("USB interface is already claimed")]
    UsbInterfaceClaimed = 5,

    #[error("Device not found")]
    DevNotFound = 6,

    #[error("Device not connected or connection lost")]
    DevNotConnected = 7,

    #[error("Device no longer responding")]
    DeadDev = 8,

    #[error("Buffer too small for operation")]
    BadBufferSize = 9,

    #[error("Invalid buffer")]
    BadBuffer = 10,

    #[error("Invalid memory type")]
    BadMemType = 11,

    #[error("Invalid memory region")]
    BadMemRegion = 12,

    #[error("Invalid range")]
    BadRange = 13,

    #[error("Invalid analog input channel specified")]
    BadAiChan = 14,

    #[error("Invalid input mode specified")]
    BadInputMode = 15,

    #[error("A background process is already in progress")]
    AlreadyActive = 16,

    #[error("Invalid trigger type specified")]
    BadTrigType = 17,

    #[error("FIFO overrun, data was not transferred from device fast enough")]
    Overrun = 18,

    #[error("FIFO underrun, data was not transferred to device fast enough")]
    Underrun = 19,

    #[error("Operation timed out")]
    TimedOut = 20,

    #[error("Invalid option specified")]
    BadOption = 21,

    #[error("Invalid sampling rate specified")]
    BadRate = 22,

    #[error("Sample count cannot be greater than FIFO size for BURSTIO scans")]
    BadBurstioCount = 23,

    #[error("Configuration not supported")]
    ConfigNotSupported = 24,

    #[error("Invalid configuration value")]
    BadConfigVal = 25,

    #[error("Invalid analog input channel type specified")]
    BadAiChanType = 26,

    #[error("ADC overrun occurred")]
    AdcOverrun = 27,

    #[error("Invalid thermocouple type specified")]
    BadTcType = 28,

    #[error("Invalid unit specified")]
    BadUnit = 29,

    #[error("Invalid queue size")]
    BadQueueSize = 30,

    #[error("Invalid config item specified")]
    BadConfigItem = 31,

    #[error("Invalid info item specified")]
    BadInfoItem = 32,

    #[error("Invalid flag specified")]
    BadFlag = 33,

    #[error("Invalid sample count specified")]
    BadSampleCount = 34,

    #[error("Internal error")]
    Internal = 35,

    #[error("Invalid coupling mode")]
    BadCouplingMode = 36,

    #[error("Invalid sensor sensitivity")]
    BadSensorSensitivity = 37,

    #[error("Invalid IEPE mode")]
    BadIepeMode = 38,

    #[error("Invalid channel queue specified")]
    BadAiChanQueue = 39,

    #[error("Invalid gain queue specified")]
    BadAiGainQueue = 40,

    #[error("Invalid mode queue specified")]
    BadAiModeQueue = 41,

    #[error("FPGA file not found")]
    FpgaFileNotFound = 42,

    #[error("Unable to read FPGA file")]
    UnableToReadFpgaFile = 43,

    #[error("FPGA not loaded")]
    NoFpga = 44,

    #[error("Invalid argument")]
    BadArg = 45,

    #[error("Minimum slope value reached")]
    MinSlopeValReached = 46,

    #[error("Maximum slope value reached")]
    MaxSlopeValReached = 47,

    #[error("Minimum offset value reached")]
    MinOffsetValReached = 48,

    #[error("Maximum offset value reached")]
    MaxOffsetValReached = 49,

    #[error("Invalid port type specified")]
    BadPortType = 50,

    #[error("Digital I/O is configured incorrectly")]
    WrongDigConfig = 51,

    #[error("Invalid bit number")]
    BadBitNum = 52,

    #[error("Invalid port value specified")]
    BadPortVal = 53,

    #[error("Invalid re-trigger count")]
    BadRetrigCount = 54,

    #[error("Invalid analog output channel specified")]
    BadAoChan = 55,

    #[error("Invalid D/A output value specified")]
    BadDaVal = 56,

    #[error("Invalid timer specified")]
    BadTmr = 57,

    #[error("Invalid frequency specified")]
    BadFrequency = 58,

    #[error("Invalid duty cycle specified")]
    BadDutyCycle = 59,

    #[error("Invalid initial delay specified")]
    BadInitialDelay = 60,

    #[error("Invalid counter specified")]
    BadCtr = 61,

    #[error("Invalid counter value specified")]
    BadCtrVal = 62,

    #[error("Invalid DAQ input channel type specified")]
    BadDaqiChanType = 63,

    #[error("Invalid number of channels specified")]
    BadNumChans = 64,

    #[error("Invalid counter register specified")]
    BadCtrReg = 65,

    #[error("Invalid counter measurement type specified")]
    BadCtrMeasureType = 66,

    #[error("Invalid counter measurement mode specified")]
    BadCtrMeasureMode = 67,

    #[error("Invalid debounce time specified")]
    BadDebounceTime = 68,

    #[error("Invalid debounce mode specified")]
    BadDebounceMode = 69,

    #[error("Invalid edge detection mode specified")]
    BadEdgeDetection = 70,

    #[error("Invalid tick size specified")]
    BadTickSize = 71,

    #[error("Invalid DAQ output channel type specified")]
    BadDaqoChanType = 72,

    #[error("No connection established")]
    NoConnectionEstablished = 73,

    #[error("Invalid event type specified")]
    BadEventType = 74,

    #[error("An event handler has already been enabled for this event type")]
    EventAlreadyEnabled = 75,

    #[error("Invalid event parameter specified")]
    BadEventParameter = 76,

    #[error("Invalid callback function specified")]
    BadCallbackFunction = 77,

    #[error("Invalid memory address")]
    BadMemAddress = 78,

    #[error("Memory access denied")]
    MemAccessDenied = 79,

    #[error("Device is not available at time of request")]
    DevUnavailable = 80,

    #[error("Re-trigger option is not supported for the specified trigger type")]
    BadRetrigTrigType = 81,

    #[error("This function cannot be used with this version of the device")]
    BadDevVer = 82,

    #[error("This digital operation is not supported on the specified port")]
    BadDigOperation = 83,

    #[error("Invalid digital port index specified")]
    BadPortIndex = 84,

    #[error("Temperature input has open connection")]
    OpenConnection = 85,

    #[error("Device is not ready to send data")]
    DevNotReady = 86,

    #[error("Pacer overrun, external clock rate too fast")]
    PacerOverrun = 87,

    #[error("Invalid trigger channel specified")]
    BadTrigChannel = 88,

    #[error("Invalid trigger level specified")]
    BadTrigLevel = 89,

    #[error("Invalid channel order")]
    BadChanOrder = 90,

    #[error("Temperature input is out of range")]
    TempOutOfRange = 91,

    #[error("Trigger threshold is out of range")]
    TrigThresholdOutOfRange = 92,

    #[error("Incompatible firmware version, firmware update required")]
    IncompatibleFirmware = 93,

    #[error("Specified network interface is not available or disconnected")]
    BadNetIfc = 94,

    #[error("Invalid host specified")]
    BadNetHost = 95,

    #[error("Invalid port specified")]
    BadNetPort = 96,

    #[error("Network interface used to obtain the device descriptor not available or disconnected")]
    NetIfcUnavailable = 97,

    #[error("Network connection failed")]
    NetConnectionFailed = 98,

    #[error("Invalid connection code")]
    BadConnectionCode = 99,

    #[error("Connection code ignored")]
    ConnectionCodeIgnored = 100,

    #[error("Network device already in use")]
    NetDevInUse = 101,

    #[error("Invalid network frame")]
    BadNetFrame = 102,

    #[error("Network device did not respond within expected time")]
    NetTimeout = 103,

    #[error("Data socket connection failed")]
    DataSocketConnectionFailed = 104,

    #[error("One or more bits on the specified port are used for alarm")]
    PortUsedForAlarm = 105,

    #[error("The specified bit is used for alarm")]
    BitUsedForAlarm = 106,

    #[error("Common-mode voltage range exceeded")]
    CmrExceeded = 107,

    #[error("Network buffer overrun, data was not transferred from buffer fast enough")]
    NetBufferOverrun = 108,

    #[error("Invalid network buffer")]
    BadNetBuffer = 109,
}

/// Coarse classification of an [`ErrorCode`], used to decide how a caller
/// can recover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorGroup {
    /// Success.
    None,
    /// Handle or argument rejected before any hardware access. Fix the call.
    Validation,
    /// Link to the device failed or was lost. Reconnect.
    Connectivity,
    /// Device rejected a configuration value. Adjust and resubmit.
    Configuration,
    /// A running scan was terminated by a device fault. Restart the scan.
    Acquisition,
    /// Unexpected internal failure.
    Internal,
    /// Codes that belong to functions this device family does not expose.
    Other,
}

impl ErrorCode {
    /// Numeric value of the code.
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == ErrorCode::NoError
    }

    /// Collapse a call outcome into the single code that describes it.
    pub fn of<T>(result: &Result<T>) -> ErrorCode {
        match result {
            Ok(_) => ErrorCode::NoError,
            Err(code) => *code,
        }
    }

    pub fn group(self) -> ErrorGroup {
        use ErrorCode::*;
        match self {
            NoError => ErrorGroup::None,
            BadDevHandle | BadDevType | BadBufferSize | BadBuffer | BadArg | BadRate
            | BadOption | BadFlag | BadSampleCount | BadNumChans | BadAiChan
            | BadDevVer | AlreadyActive => ErrorGroup::Validation,
            UsbDevNoPermission | UsbInterfaceClaimed | DevNotFound | DevNotConnected
            | DeadDev | TimedOut | NoConnectionEstablished | DevUnavailable | DevNotReady
            | IncompatibleFirmware | BadNetIfc | BadNetHost | BadNetPort | NetIfcUnavailable
            | NetConnectionFailed | NetDevInUse | BadNetFrame | NetTimeout
            | DataSocketConnectionFailed => ErrorGroup::Connectivity,
            BadConfigVal | ConfigNotSupported | BadConfigItem | BadRange
            | BadAiGainQueue => ErrorGroup::Configuration,
            Overrun | Underrun | AdcOverrun | PacerOverrun | NetBufferOverrun => {
                ErrorGroup::Acquisition
            }
            UnhandledException | Internal => ErrorGroup::Internal,
            _ => ErrorGroup::Other,
        }
    }
}

impl TryFrom<i32> for ErrorCode {
    type Error = i32;

    fn try_from(v: i32) -> std::result::Result<Self, i32> {
        use ErrorCode::*;
        Ok(match v {
            0 => NoError,
            1 => UnhandledException,
            2 => BadDevHandle,
            3 => BadDevType,
            4 => UsbDevNoPermission,
            5 => UsbInterfaceClaimed,
            6 => DevNotFound,
            7 => DevNotConnected,
            8 => DeadDev,
            9 => BadBufferSize,
            10 => BadBuffer,
            11 => BadMemType,
            12 => BadMemRegion,
            13 => BadRange,
            14 => BadAiChan,
            15 => BadInputMode,
            16 => AlreadyActive,
            17 => BadTrigType,
            18 => Overrun,
            19 => Underrun,
            20 => TimedOut,
            21 => BadOption,
            22 => BadRate,
            23 => BadBurstioCount,
            24 => ConfigNotSupported,
            25 => BadConfigVal,
            26 => BadAiChanType,
            27 => AdcOverrun,
            28 => BadTcType,
            29 => BadUnit,
            30 => BadQueueSize,
            31 => BadConfigItem,
            32 => BadInfoItem,
            33 => BadFlag,
            34 => BadSampleCount,
            35 => Internal,
            36 => BadCouplingMode,
            37 => BadSensorSensitivity,
            38 => BadIepeMode,
            39 => BadAiChanQueue,
            40 => BadAiGainQueue,
            41 => BadAiModeQueue,
            42 => FpgaFileNotFound,
            43 => UnableToReadFpgaFile,
            44 => NoFpga,
            45 => BadArg,
            46 => MinSlopeValReached,
            47 => MaxSlopeValReached,
            48 => MinOffsetValReached,
            49 => MaxOffsetValReached,
            50 => BadPortType,
            51 => WrongDigConfig,
            52 => BadBitNum,
            53 => BadPortVal,
            54 => BadRetrigCount,
            55 => BadAoChan,
            56 => BadDaVal,
            57 => BadTmr,
            58 => BadFrequency,
            59 => BadDutyCycle,
            60 => BadInitialDelay,
            61 => BadCtr,
            62 => BadCtrVal,
            63 => BadDaqiChanType,
            64 => BadNumChans,
            65 => BadCtrReg,
            66 => BadCtrMeasureType,
            67 => BadCtrMeasureMode,
            68 => BadDebounceTime,
            69 => BadDebounceMode,
            70 => BadEdgeDetection,
            71 => BadTickSize,
            72 => BadDaqoChanType,
            73 => NoConnectionEstablished,
            74 => BadEventType,
            75 => EventAlreadyEnabled,
            76 => BadEventParameter,
            77 => BadCallbackFunction,
            78 => BadMemAddress,
            79 => MemAccessDenied,
            80 => DevUnavailable,
            81 => BadRetrigTrigType,
            82 => BadDevVer,
            83 => BadDigOperation,
            84 => BadPortIndex,
            85 => OpenConnection,
            86 => DevNotReady,
            87 => PacerOverrun,
            88 => BadTrigChannel,
            89 => BadTrigLevel,
            90 => BadChanOrder,
            91 => TempOutOfRange,
            92 => TrigThresholdOutOfRange,
            93 => IncompatibleFirmware,
            94 => BadNetIfc,
            95 => BadNetHost,
            96 => BadNetPort,
            97 => NetIfcUnavailable,
            98 => NetConnectionFailed,
            99 => BadConnectionCode,
            100 => ConnectionCodeIgnored,
            101 => NetDevInUse,
            102 => BadNetFrame,
            103 => NetTimeout,
            104 => DataSocketConnectionFailed,
            105 => PortUsedForAlarm,
            106 => BitUsedForAlarm,
            107 => CmrExceeded,
            108 => NetBufferOverrun,
            109 => BadNetBuffer,
            _ => return Err(v),
        })
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> i32 {
        code.code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_value_round_trips() {
        for v in 0..110 {
            let code = ErrorCode::try_from(v).unwrap();
            assert_eq!(code.code(), v);
        }
        assert_eq!(ErrorCode::try_from(110), Err(110));
        assert_eq!(ErrorCode::try_from(-1), Err(-1));
    }

    #[test]
    fn values_match_vendor_header() {
        assert_eq!(ErrorCode::NoError.code(), 0);
        assert_eq!(ErrorCode::BadDevHandle.code(), 2);
        assert_eq!(ErrorCode::BadBufferSize.code(), 9);
        assert_eq!(ErrorCode::AlreadyActive.code(), 16);
        assert_eq!(ErrorCode::Overrun.code(), 18);
        assert_eq!(ErrorCode::BadConfigVal.code(), 25);
        assert_eq!(ErrorCode::Internal.code(), 35);
        assert_eq!(ErrorCode::BadArg.code(), 45);
        assert_eq!(ErrorCode::PacerOverrun.code(), 87);
        assert_eq!(ErrorCode::IncompatibleFirmware.code(), 93);
        assert_eq!(ErrorCode::BadNetBuffer.code(), 109);
    }

    #[test]
    fn display_uses_vendor_wording() {
        assert_eq!(ErrorCode::BadDevHandle.to_string(), "Invalid device handle");
        assert_eq!(
            ErrorCode::BadBufferSize.to_string(),
            "Buffer too small for operation"
        );
    }

    #[test]
    fn of_collapses_results() {
        let ok: Result<u8> = Ok(1);
        let err: Result<u8> = Err(ErrorCode::DeadDev);
        assert_eq!(ErrorCode::of(&ok), ErrorCode::NoError);
        assert_eq!(ErrorCode::of(&err), ErrorCode::DeadDev);
        assert!(ErrorCode::of(&ok).is_success());
    }

    #[test]
    fn groups() {
        assert_eq!(ErrorCode::BadArg.group(), ErrorGroup::Validation);
        assert_eq!(ErrorCode::NetTimeout.group(), ErrorGroup::Connectivity);
        assert_eq!(ErrorCode::ConfigNotSupported.group(), ErrorGroup::Configuration);
        assert_eq!(ErrorCode::AdcOverrun.group(), ErrorGroup::Acquisition);
        assert_eq!(ErrorCode::UnhandledException.group(), ErrorGroup::Internal);
        assert_eq!(ErrorCode::BadTcType.group(), ErrorGroup::Other);
    }
}
