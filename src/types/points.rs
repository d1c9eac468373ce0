//! Point types for DNP3 measurements.
//!
//! This module defines the typed values exchanged with the point database
//! and written to or read from application objects.

/// Kind of point held by the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Binary input
    Binary,
    /// Analog input
    Analog,
    /// Counter
    Counter,
    /// Binary output status
    ControlStatus,
    /// Analog output status
    SetpointStatus,
}

impl DataType {
    /// All point types, in configuration order.
    pub const ALL: [DataType; 5] = [
        Self::Binary,
        Self::Analog,
        Self::Counter,
        Self::ControlStatus,
        Self::SetpointStatus,
    ];
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Binary => "Binary",
            Self::Analog => "Analog",
            Self::Counter => "Counter",
            Self::ControlStatus => "ControlStatus",
            Self::SetpointStatus => "SetpointStatus",
        };
        f.write_str(name)
    }
}

/// Event class assignment of a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PointClass {
    /// Static only, no events
    #[default]
    Class0,
    /// Event class 1
    Class1,
    /// Event class 2
    Class2,
    /// Event class 3
    Class3,
}

/// DNP3 point quality flags.
///
/// The flag byte as it appears on the wire. Bit layout:
/// - Bit 0: online
/// - Bit 1: restart
/// - Bit 2: comm lost
/// - Bit 3: remote forced
/// - Bit 4: local forced
/// - Bit 5: chatter filter (binary), over-range (analog), rollover (counter)
/// - Bit 6: reference check (analog), discontinuity (counter)
/// - Bit 7: state (binary and control status)
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct Quality(u8);

impl Quality {
    pub const ONLINE_MASK: u8 = 0b0000_0001;
    pub const RESTART_MASK: u8 = 0b0000_0010;
    pub const COMM_LOST_MASK: u8 = 0b0000_0100;
    pub const REMOTE_FORCED_MASK: u8 = 0b0000_1000;
    pub const LOCAL_FORCED_MASK: u8 = 0b0001_0000;
    pub const OVER_RANGE_MASK: u8 = 0b0010_0000;
    pub const REFERENCE_CHECK_MASK: u8 = 0b0100_0000;
    pub const STATE_MASK: u8 = 0b1000_0000;
}

impl Quality {
    /// Quality of a point that has never been updated (restart, offline).
    #[allow(non_upper_case_globals)]
    pub const Restart: Self = Self(Self::RESTART_MASK);

    /// Online with no other flags.
    #[allow(non_upper_case_globals)]
    pub const Online: Self = Self(Self::ONLINE_MASK);

    #[inline(always)]
    const fn with(mut self, mask: u8, value: bool) -> Self {
        if value {
            self.0 |= mask;
        } else {
            self.0 &= !mask;
        }
        self
    }

    /// Online
    #[inline(always)]
    pub const fn online(&self) -> bool {
        (self.0 & Self::ONLINE_MASK) != 0
    }

    /// Set online flag
    #[inline(always)]
    pub const fn set_online(self, value: bool) -> Self {
        self.with(Self::ONLINE_MASK, value)
    }

    /// Restart: the point has not been updated since the device restarted
    #[inline(always)]
    pub const fn restart(&self) -> bool {
        (self.0 & Self::RESTART_MASK) != 0
    }

    /// Set restart flag
    #[inline(always)]
    pub const fn set_restart(self, value: bool) -> Self {
        self.with(Self::RESTART_MASK, value)
    }

    /// Communication lost with the originating device
    #[inline(always)]
    pub const fn comm_lost(&self) -> bool {
        (self.0 & Self::COMM_LOST_MASK) != 0
    }

    /// Set comm lost flag
    #[inline(always)]
    pub const fn set_comm_lost(self, value: bool) -> Self {
        self.with(Self::COMM_LOST_MASK, value)
    }

    /// Value forced at a remote device
    #[inline(always)]
    pub const fn remote_forced(&self) -> bool {
        (self.0 & Self::REMOTE_FORCED_MASK) != 0
    }

    /// Set remote forced flag
    #[inline(always)]
    pub const fn set_remote_forced(self, value: bool) -> Self {
        self.with(Self::REMOTE_FORCED_MASK, value)
    }

    /// Value forced locally
    #[inline(always)]
    pub const fn local_forced(&self) -> bool {
        (self.0 & Self::LOCAL_FORCED_MASK) != 0
    }

    /// Set local forced flag
    #[inline(always)]
    pub const fn set_local_forced(self, value: bool) -> Self {
        self.with(Self::LOCAL_FORCED_MASK, value)
    }

    /// Over-range (analog), rollover (counter) or chatter filter (binary)
    #[inline(always)]
    pub const fn over_range(&self) -> bool {
        (self.0 & Self::OVER_RANGE_MASK) != 0
    }

    /// Set over-range flag
    #[inline(always)]
    pub const fn set_over_range(self, value: bool) -> Self {
        self.with(Self::OVER_RANGE_MASK, value)
    }

    /// Reference check (analog) or discontinuity (counter)
    #[inline(always)]
    pub const fn reference_check(&self) -> bool {
        (self.0 & Self::REFERENCE_CHECK_MASK) != 0
    }

    /// Set reference check flag
    #[inline(always)]
    pub const fn set_reference_check(self, value: bool) -> Self {
        self.with(Self::REFERENCE_CHECK_MASK, value)
    }

    /// State bit of binary and control status flag bytes
    #[inline(always)]
    pub const fn state(&self) -> bool {
        (self.0 & Self::STATE_MASK) != 0
    }

    /// Set state bit
    #[inline(always)]
    pub const fn set_state(self, value: bool) -> Self {
        self.with(Self::STATE_MASK, value)
    }

    /// Get the raw flag byte
    #[inline(always)]
    pub const fn as_raw(&self) -> u8 {
        self.0
    }

    /// Create from a raw flag byte
    #[inline(always)]
    pub const fn from_raw(raw: u8) -> Self {
        Self(raw)
    }
}

impl std::fmt::Debug for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Quality({})", self)
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const NAMES: [&str; 8] = ["ONLINE", "RESTART", "COMM_LOST", "REMOTE_FORCED", "LOCAL_FORCED", "OVER_RANGE", "REF_CHECK", "STATE"];

        if self.0 == 0 {
            return f.write_str("NONE");
        }

        let mut first = true;
        for (bit, name) in NAMES.iter().enumerate() {
            if self.0 & (1 << bit) != 0 {
                if !first {
                    f.write_str("|")?;
                }
                first = false;
                f.write_str(name)?;
            }
        }
        Ok(())
    }
}

/// A typed point value with quality and time.
///
/// Time is milliseconds since 1970-01-01 UTC, carried on the wire as a
/// 48-bit value.
pub trait Point: Copy {
    /// Native value type held by the database
    type Value: Copy + PartialOrd;

    /// The database type of this point
    const DATA_TYPE: DataType;

    /// Current value
    fn value(&self) -> Self::Value;

    /// Quality flags, excluding any state bit
    fn quality(&self) -> Quality;

    /// Timestamp in milliseconds since the epoch
    fn time(&self) -> i64;

    /// Flag byte as written on the wire
    fn flags(&self) -> u8 {
        self.quality().as_raw()
    }
}

macro_rules! point_type {
    ($(#[$doc:meta])* $name:ident, $value:ty, $data_type:expr, state_bit = $state:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq)]
        pub struct $name {
            /// Point value
            pub value: $value,
            /// Quality flags
            pub quality: Quality,
            /// Milliseconds since the epoch, 0 if unknown
            pub time: i64,
        }

        impl $name {
            /// Create an online point with no timestamp.
            #[inline]
            pub const fn new(value: $value) -> Self {
                Self {
                    value,
                    quality: Quality::Online,
                    time: 0,
                }
            }

            /// Create a point with explicit quality.
            #[inline]
            pub const fn with_quality(value: $value, quality: Quality) -> Self {
                Self {
                    value,
                    quality,
                    time: 0,
                }
            }

            /// Create a point with quality and timestamp.
            #[inline]
            pub const fn with_time(value: $value, quality: Quality, time: i64) -> Self {
                Self {
                    value,
                    quality,
                    time,
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::with_quality(<$value>::default(), Quality::Restart)
            }
        }

        impl Point for $name {
            type Value = $value;
            const DATA_TYPE: DataType = $data_type;

            #[inline]
            fn value(&self) -> $value {
                self.value
            }

            #[inline]
            fn quality(&self) -> Quality {
                self.quality
            }

            #[inline]
            fn time(&self) -> i64 {
                self.time
            }

            #[inline]
            #[allow(clippy::useless_conversion)]
            fn flags(&self) -> u8 {
                if $state {
                    self.quality.set_state(self.value != <$value>::default()).as_raw()
                } else {
                    self.quality.as_raw()
                }
            }
        }
    };
}

point_type!(
    /// Binary input
    Binary, bool, DataType::Binary, state_bit = true
);
point_type!(
    /// Analog input
    Analog, f64, DataType::Analog, state_bit = false
);
point_type!(
    /// Counter
    Counter, u32, DataType::Counter, state_bit = false
);
point_type!(
    /// Binary output status
    ControlStatus, bool, DataType::ControlStatus, state_bit = true
);
point_type!(
    /// Analog output status
    SetpointStatus, f64, DataType::SetpointStatus, state_bit = false
);

/// One decoded point with its device index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Measurement {
    /// Binary input at index
    Binary(Binary, usize),
    /// Analog input at index
    Analog(Analog, usize),
    /// Counter at index
    Counter(Counter, usize),
    /// Binary output status at index
    ControlStatus(ControlStatus, usize),
    /// Analog output status at index
    SetpointStatus(SetpointStatus, usize),
}

impl Measurement {
    /// Point type of this measurement.
    pub const fn data_type(&self) -> DataType {
        match self {
            Self::Binary(..) => DataType::Binary,
            Self::Analog(..) => DataType::Analog,
            Self::Counter(..) => DataType::Counter,
            Self::ControlStatus(..) => DataType::ControlStatus,
            Self::SetpointStatus(..) => DataType::SetpointStatus,
        }
    }

    /// Device index of this measurement.
    pub const fn index(&self) -> usize {
        match self {
            Self::Binary(_, i)
            | Self::Analog(_, i)
            | Self::Counter(_, i)
            | Self::ControlStatus(_, i)
            | Self::SetpointStatus(_, i) => *i,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_flags() {
        let q = Quality::Online.set_over_range(true);
        assert!(q.online());
        assert!(q.over_range());
        assert!(!q.restart());
        assert_eq!(q.as_raw(), 0x21);

        let q = q.set_online(false);
        assert_eq!(q.as_raw(), 0x20);
    }

    #[test]
    fn test_quality_display() {
        assert_eq!(Quality::from_raw(0).to_string(), "NONE");
        assert_eq!(Quality::Online.to_string(), "ONLINE");
        assert_eq!(Quality::from_raw(0x81).to_string(), "ONLINE|STATE");
        assert_eq!(format!("{:?}", Quality::Restart), "Quality(RESTART)");
    }

    #[test]
    fn test_quality_bit_isolation() {
        let setters: [fn(Quality, bool) -> Quality; 8] = [
            Quality::set_online,
            Quality::set_restart,
            Quality::set_comm_lost,
            Quality::set_remote_forced,
            Quality::set_local_forced,
            Quality::set_over_range,
            Quality::set_reference_check,
            Quality::set_state,
        ];
        for (bit, set) in setters.iter().enumerate() {
            assert_eq!(set(Quality::from_raw(0), true).as_raw(), 1 << bit);
            assert_eq!(set(Quality::from_raw(0xFF), false).as_raw(), !(1u8 << bit));
        }
    }

    #[test]
    fn test_binary_flags_include_state() {
        let on = Binary::new(true);
        assert_eq!(on.flags(), 0x81);
        let off = Binary::new(false);
        assert_eq!(off.flags(), 0x01);
        assert_eq!(ControlStatus::new(true).flags(), 0x81);
    }

    #[test]
    fn test_analog_flags_exclude_state() {
        let a = Analog::with_quality(12.5, Quality::Online.set_reference_check(true));
        assert_eq!(a.flags(), 0x41);
        assert_eq!(Counter::new(7).flags(), 0x01);
    }

    #[test]
    fn test_default_is_restart() {
        let a = Analog::default();
        assert_eq!(a.value, 0.0);
        assert!(a.quality.restart());
        assert!(!a.quality.online());
        assert_eq!(Binary::default().flags(), 0x02);
    }

    #[test]
    fn test_measurement_accessors() {
        let m = Measurement::Counter(Counter::new(5), 9);
        assert_eq!(m.data_type(), DataType::Counter);
        assert_eq!(m.index(), 9);
        assert_eq!(DataType::SetpointStatus.to_string(), "SetpointStatus");
    }

    #[test]
    fn test_quality_packed_size() {
        assert_eq!(std::mem::size_of::<Quality>(), 1);
    }
}
