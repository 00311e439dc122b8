//! INDI XML Protocol definitions

/// INDI protocol version
pub const INDI_PROTOCOL_VERSION: &str = "1.7";

/// Standard INDI properties
pub mod standard_properties {
    /// Connection control switch
    pub const CONNECTION: &str = "CONNECTION";
    pub const CONNECT: &str = "CONNECT";
    pub const DISCONNECT: &str = "DISCONNECT";

    /// Device polling period, written once at connect to normalize update cadence
    pub const POLLING_PERIOD: &str = "POLLING_PERIOD";
    pub const PERIOD_MS: &str = "PERIOD_MS";

    // Camera properties
    pub const CCD_EXPOSURE: &str = "CCD_EXPOSURE";
    pub const CCD_EXPOSURE_VALUE: &str = "CCD_EXPOSURE_VALUE";
    pub const CCD_ABORT_EXPOSURE: &str = "CCD_ABORT_EXPOSURE";
    pub const CCD_FRAME: &str = "CCD_FRAME";
    pub const CCD_BINNING: &str = "CCD_BINNING";
    pub const CCD_TEMPERATURE: &str = "CCD_TEMPERATURE";
    pub const CCD_COOLER: &str = "CCD_COOLER";
    pub const CCD_INFO: &str = "CCD_INFO";
    pub const READOUT_QUALITY: &str = "READOUT_QUALITY";
    pub const CCD1: &str = "CCD1"; // BLOB property for image data

    // Dome properties
    pub const DOME_SHUTTER: &str = "DOME_SHUTTER";
    pub const ABS_DOME_POSITION: &str = "ABS_DOME_POSITION";
    pub const DOME_ABSOLUTE_POSITION: &str = "DOME_ABSOLUTE_POSITION";
    pub const DOME_ABORT_MOTION: &str = "DOME_ABORT_MOTION";

    // Cover / flat panel properties
    pub const CAP_PARK: &str = "CAP_PARK";
    pub const FLAT_LIGHT_CONTROL: &str = "FLAT_LIGHT_CONTROL";
    pub const FLAT_LIGHT_INTENSITY: &str = "FLAT_LIGHT_INTENSITY";

    // Power box properties (Pegasus UPB)
    pub const POWER_CONTROL: &str = "POWER_CONTROL";
    pub const POWER_ON_BOOT: &str = "POWER_ON_BOOT";
    pub const USB_HUB_CONTROL: &str = "USB_HUB_CONTROL";
    pub const USB_PORT_CONTROL: &str = "USB_PORT_CONTROL";
    pub const AUTO_DEW: &str = "AUTO_DEW";
    pub const DEW_PWM: &str = "DEW_PWM";
    pub const ADJUSTABLE_VOLTAGE: &str = "ADJUSTABLE_VOLTAGE";

    // Weather properties
    pub const WEATHER_UPDATE: &str = "WEATHER_UPDATE";
    pub const WEATHER_PARAMETERS: &str = "WEATHER_PARAMETERS";
    pub const WEATHER_TEMPERATURE: &str = "WEATHER_TEMPERATURE";
    pub const WEATHER_HUMIDITY: &str = "WEATHER_HUMIDITY";
    pub const WEATHER_PRESSURE: &str = "WEATHER_PRESSURE";
    pub const WEATHER_WIND_SPEED: &str = "WEATHER_WIND_SPEED";
    pub const SKY_QUALITY: &str = "SKY_QUALITY";
}
