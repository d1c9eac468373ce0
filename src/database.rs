//! Point database.
//!
//! Holds the current value of every configured point, detects changes and
//! forwards events for binary, analog and counter points to an
//! [`EventSink`] together with the point's class. Control and setpoint
//! status points are stored but never generate events.

use tracing::debug;

use crate::error::{Dnp3Error, Result};
use crate::types::{
    Analog, Binary, ControlStatus, Counter, DataType, Measurement, Point, PointClass, Quality,
    SetpointStatus,
};

/// Receives events raised by the database.
pub trait EventSink {
    /// A point changed. `event` carries the new value and its index.
    fn on_event(&mut self, event: Measurement, class: PointClass);
}

/// Discards every event.
impl EventSink for () {
    fn on_event(&mut self, _event: Measurement, _class: PointClass) {}
}

impl EventSink for Vec<(Measurement, PointClass)> {
    fn on_event(&mut self, event: Measurement, class: PointClass) {
        self.push((event, class));
    }
}

impl EventSink for tokio::sync::mpsc::UnboundedSender<(Measurement, PointClass)> {
    fn on_event(&mut self, event: Measurement, class: PointClass) {
        let _ = self.send((event, class));
    }
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn on_event(&mut self, event: Measurement, class: PointClass) {
        (**self).on_event(event, class)
    }
}

/// Stored state of one point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointRecord<T> {
    /// Current value
    pub point: T,
    /// Event class
    pub class: PointClass,
    /// Change threshold for analog and counter points
    pub deadband: f64,
    last_event: f64,
}

impl<T: Default> Default for PointRecord<T> {
    fn default() -> Self {
        Self {
            point: T::default(),
            class: PointClass::default(),
            deadband: 0.0,
            last_event: 0.0,
        }
    }
}

/// A point type the database can store.
pub trait DatabasePoint: Point + Default + std::fmt::Debug {
    /// Records of this type.
    fn records<S>(db: &Database<S>) -> &Vec<PointRecord<Self>>;

    /// Records of this type, mutably.
    fn records_mut<S>(db: &mut Database<S>) -> &mut Vec<PointRecord<Self>>;

    /// Wrap the point with its index.
    fn measurement(self, index: usize) -> Measurement;

    /// Numeric value compared against the deadband. `None` for types that
    /// change on any value difference.
    fn magnitude(&self) -> Option<f64> {
        None
    }

    /// Check if changes of this type raise events.
    fn generates_events() -> bool {
        matches!(Self::DATA_TYPE, DataType::Binary | DataType::Analog | DataType::Counter)
    }

    /// Mark the point online and clear restart, leaving other flags alone.
    fn set_online(&mut self);
}

macro_rules! database_point {
    ($ty:ident, $field:ident, $variant:ident $(, magnitude = |$p:ident| $mag:expr)?) => {
        impl DatabasePoint for $ty {
            fn records<S>(db: &Database<S>) -> &Vec<PointRecord<Self>> {
                &db.$field
            }

            fn records_mut<S>(db: &mut Database<S>) -> &mut Vec<PointRecord<Self>> {
                &mut db.$field
            }

            fn measurement(self, index: usize) -> Measurement {
                Measurement::$variant(self, index)
            }

            $(
                fn magnitude(&self) -> Option<f64> {
                    let $p = self;
                    Some($mag)
                }
            )?

            fn set_online(&mut self) {
                self.quality = self.quality.set_online(true).set_restart(false);
            }
        }
    };
}

database_point!(Binary, binary, Binary);
database_point!(Analog, analog, Analog, magnitude = |p| p.value);
database_point!(Counter, counter, Counter, magnitude = |p| p.value as f64);
database_point!(ControlStatus, control_status, ControlStatus);
database_point!(SetpointStatus, setpoint_status, SetpointStatus);

/// Apply `$body` to the record vector selected by a runtime [`DataType`].
macro_rules! with_records {
    ($self:ident, $data_type:expr, |$records:ident| $body:expr) => {
        match $data_type {
            DataType::Binary => {
                let $records = &mut $self.binary;
                $body
            }
            DataType::Analog => {
                let $records = &mut $self.analog;
                $body
            }
            DataType::Counter => {
                let $records = &mut $self.counter;
                $body
            }
            DataType::ControlStatus => {
                let $records = &mut $self.control_status;
                $body
            }
            DataType::SetpointStatus => {
                let $records = &mut $self.setpoint_status;
                $body
            }
        }
    };
}

/// Template for one point.
#[derive(Debug, Clone, PartialEq)]
pub struct PointTemplate {
    /// Point name
    pub name: String,
    /// Event class
    pub class: PointClass,
    /// Deadband (analog points)
    pub deadband: f64,
}

impl PointTemplate {
    /// Create a template with the given name, class 1 and no deadband.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class: PointClass::Class1,
            deadband: 0.0,
        }
    }

    /// Set the event class.
    pub fn class(mut self, class: PointClass) -> Self {
        self.class = class;
        self
    }

    /// Set the deadband.
    pub fn deadband(mut self, deadband: f64) -> Self {
        self.deadband = deadband;
        self
    }
}

/// In-memory description of a device's points.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceTemplate {
    /// Binary inputs
    pub binary: Vec<PointTemplate>,
    /// Analog inputs
    pub analog: Vec<PointTemplate>,
    /// Counters
    pub counter: Vec<PointTemplate>,
    /// Binary output statuses
    pub control_status: Vec<PointTemplate>,
    /// Analog output statuses
    pub setpoint_status: Vec<PointTemplate>,
    /// Whether points start online instead of restart
    pub start_online: bool,
}

impl DeviceTemplate {
    /// Create a template with default-named points of each type.
    pub fn new(binary: usize, analog: usize, counter: usize, control_status: usize, setpoint_status: usize) -> Self {
        let named = |prefix: &str, n: usize| -> Vec<PointTemplate> {
            (0..n).map(|i| PointTemplate::new(format!("{}{}", prefix, i))).collect()
        };
        Self {
            binary: named("BI", binary),
            analog: named("AI", analog),
            counter: named("CI", counter),
            control_status: named("BO", control_status),
            setpoint_status: named("AO", setpoint_status),
            start_online: false,
        }
    }

    /// Set whether points start online.
    pub fn start_online(mut self, start_online: bool) -> Self {
        self.start_online = start_online;
        self
    }

    /// Set the class of every binary, analog and counter point.
    pub fn event_class(mut self, class: PointClass) -> Self {
        for point in self
            .binary
            .iter_mut()
            .chain(self.analog.iter_mut())
            .chain(self.counter.iter_mut())
        {
            point.class = class;
        }
        self
    }

    /// Set the deadband of every analog point.
    pub fn analog_deadband(mut self, deadband: f64) -> Self {
        for point in &mut self.analog {
            point.deadband = deadband;
        }
        self
    }
}

/// Point database.
#[derive(Debug, Default)]
pub struct Database<S = ()> {
    binary: Vec<PointRecord<Binary>>,
    analog: Vec<PointRecord<Analog>>,
    counter: Vec<PointRecord<Counter>>,
    control_status: Vec<PointRecord<ControlStatus>>,
    setpoint_status: Vec<PointRecord<SetpointStatus>>,
    sink: S,
}

impl Database {
    /// Create an empty database that discards events.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S: EventSink> Database<S> {
    /// Create an empty database forwarding events to `sink`.
    pub fn with_sink(sink: S) -> Self {
        Self {
            binary: Vec::new(),
            analog: Vec::new(),
            counter: Vec::new(),
            control_status: Vec::new(),
            setpoint_status: Vec::new(),
            sink,
        }
    }

    /// The event sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// The event sink, mutably.
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Size the point list of `data_type` to `count`.
    ///
    /// New points start with restart quality, or online if `start_online`.
    pub fn configure(&mut self, data_type: DataType, count: usize, start_online: bool) {
        debug!("Configure {} x{} (online: {})", data_type, count, start_online);
        with_records!(self, data_type, |records| {
            records.resize_with(count, Default::default);
            if start_online {
                records.iter_mut().for_each(|r| r.point.set_online());
            }
        })
    }

    /// Configure every point type from a template.
    ///
    /// Classes are taken for binary, analog and counter points; deadbands
    /// for analog points.
    pub fn configure_template(&mut self, template: &DeviceTemplate) -> Result<()> {
        let online = template.start_online;
        self.configure(DataType::Binary, template.binary.len(), online);
        self.configure(DataType::Analog, template.analog.len(), online);
        self.configure(DataType::Counter, template.counter.len(), online);
        self.configure(DataType::ControlStatus, template.control_status.len(), online);
        self.configure(DataType::SetpointStatus, template.setpoint_status.len(), online);

        for (i, point) in template.binary.iter().enumerate() {
            self.set_class_at(DataType::Binary, i, point.class)?;
        }
        for (i, point) in template.counter.iter().enumerate() {
            self.set_class_at(DataType::Counter, i, point.class)?;
        }
        for (i, point) in template.analog.iter().enumerate() {
            self.set_class_at(DataType::Analog, i, point.class)?;
            self.set_deadband(DataType::Analog, i, point.deadband)?;
        }
        Ok(())
    }

    /// Assign `class` to every point of `data_type`.
    pub fn set_class(&mut self, data_type: DataType, class: PointClass) -> Result<()> {
        check_class_assignable(data_type)?;
        with_records!(self, data_type, |records| {
            records.iter_mut().for_each(|r| r.class = class);
        });
        Ok(())
    }

    /// Assign `class` to one point.
    pub fn set_class_at(&mut self, data_type: DataType, index: usize, class: PointClass) -> Result<()> {
        check_class_assignable(data_type)?;
        with_records!(self, data_type, |records| {
            let count = records.len();
            records
                .get_mut(index)
                .ok_or_else(|| Dnp3Error::index_out_of_bounds(data_type, index, count))?
                .class = class;
        });
        Ok(())
    }

    /// Set the deadband of one analog or counter point.
    pub fn set_deadband(&mut self, data_type: DataType, index: usize, deadband: f64) -> Result<()> {
        match data_type {
            DataType::Analog | DataType::Counter => {}
            other => return Err(Dnp3Error::DeadbandNotAssignable(other)),
        }
        with_records!(self, data_type, |records| {
            let count = records.len();
            records
                .get_mut(index)
                .ok_or_else(|| Dnp3Error::index_out_of_bounds(data_type, index, count))?
                .deadband = deadband;
        });
        Ok(())
    }

    /// Store a new value for the point at `index`.
    ///
    /// Returns true if the update counts as a change. Changes of binary,
    /// analog and counter points are forwarded to the sink.
    pub fn update<T: DatabasePoint>(&mut self, point: T, index: usize) -> Result<bool> {
        let records = T::records_mut(self);
        let count = records.len();
        let record = records
            .get_mut(index)
            .ok_or_else(|| Dnp3Error::index_out_of_bounds(T::DATA_TYPE, index, count))?;

        let mut changed = point.quality() != record.point.quality();
        match point.magnitude() {
            Some(value) => {
                if (value - record.last_event).abs() > record.deadband {
                    changed = true;
                }
                if changed {
                    record.last_event = value;
                }
            }
            None => changed |= point.value() != record.point.value(),
        }
        record.point = point;
        let class = record.class;

        if changed && T::generates_events() {
            debug!("{} change: {:?} index {}", T::DATA_TYPE, point, index);
            self.sink.on_event(point.measurement(index), class);
        }
        Ok(changed)
    }

    /// Push decoded measurements into the database.
    ///
    /// Returns the number of changed points.
    pub fn load(&mut self, measurements: &[Measurement]) -> Result<usize> {
        let mut changed = 0;
        for m in measurements {
            let hit = match *m {
                Measurement::Binary(p, i) => self.update(p, i)?,
                Measurement::Analog(p, i) => self.update(p, i)?,
                Measurement::Counter(p, i) => self.update(p, i)?,
                Measurement::ControlStatus(p, i) => self.update(p, i)?,
                Measurement::SetpointStatus(p, i) => self.update(p, i)?,
            };
            changed += hit as usize;
        }
        Ok(changed)
    }

    /// Current value of the point at `index`.
    pub fn get<T: DatabasePoint>(&self, index: usize) -> Result<&T> {
        self.record::<T>(index).map(|r| &r.point)
    }

    /// Stored record of the point at `index`.
    pub fn record<T: DatabasePoint>(&self, index: usize) -> Result<&PointRecord<T>> {
        let records = T::records(self);
        records
            .get(index)
            .ok_or_else(|| Dnp3Error::index_out_of_bounds(T::DATA_TYPE, index, records.len()))
    }

    /// All records of a point type.
    pub fn records<T: DatabasePoint>(&self) -> &[PointRecord<T>] {
        T::records(self)
    }

    /// Number of configured points of `data_type`.
    pub fn num_type(&self, data_type: DataType) -> usize {
        match data_type {
            DataType::Binary => self.binary.len(),
            DataType::Analog => self.analog.len(),
            DataType::Counter => self.counter.len(),
            DataType::ControlStatus => self.control_status.len(),
            DataType::SetpointStatus => self.setpoint_status.len(),
        }
    }

    /// Highest configured index of `data_type`.
    pub fn max_index(&self, data_type: DataType) -> Result<usize> {
        match self.num_type(data_type) {
            0 => Err(Dnp3Error::argument("No points for datatype")),
            n => Ok(n - 1),
        }
    }
}

fn check_class_assignable(data_type: DataType) -> Result<()> {
    match data_type {
        DataType::ControlStatus | DataType::SetpointStatus => Err(Dnp3Error::ClassNotAssignable(data_type)),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Events = Vec<(Measurement, PointClass)>;

    fn database() -> Database<Events> {
        let mut db = Database::with_sink(Events::new());
        for data_type in DataType::ALL {
            db.configure(data_type, 3, false);
        }
        db
    }

    #[test]
    fn test_configure_and_counts() {
        let mut db = Database::new();
        db.configure(DataType::Analog, 4, false);
        assert_eq!(db.num_type(DataType::Analog), 4);
        assert_eq!(db.max_index(DataType::Analog).unwrap(), 3);
        assert!(db.get::<Analog>(0).unwrap().quality.restart());

        let err = db.max_index(DataType::Counter).unwrap_err();
        assert!(err.to_string().contains("No points for datatype"));
    }

    #[test]
    fn test_configure_start_online() {
        let mut db = Database::new();
        db.configure(DataType::Binary, 2, true);
        assert_eq!(db.get::<Binary>(1).unwrap().quality, Quality::Online);
    }

    #[test]
    fn test_start_online_keeps_other_flags() {
        let mut db = Database::new();
        db.configure(DataType::Binary, 1, false);
        let point = Binary::with_quality(true, Quality::Online.set_comm_lost(true));
        db.update(point, 0).unwrap();
        db.configure(DataType::Binary, 2, true);

        let quality = db.get::<Binary>(0).unwrap().quality;
        assert!(quality.online());
        assert!(quality.comm_lost());
        assert!(!quality.restart());
        assert!(db.get::<Binary>(0).unwrap().value);
        assert_eq!(db.get::<Binary>(1).unwrap().quality, Quality::Online);
    }

    #[test]
    fn test_binary_change_raises_event() {
        let mut db = database();
        db.set_class(DataType::Binary, PointClass::Class2).unwrap();

        assert!(db.update(Binary::new(true), 1).unwrap());
        assert!(!db.update(Binary::new(true), 1).unwrap());
        assert!(db.update(Binary::new(false), 1).unwrap());

        let events = db.sink();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], (Measurement::Binary(Binary::new(true), 1), PointClass::Class2));
        assert_eq!(events[1].0.index(), 1);
    }

    #[test]
    fn test_analog_deadband() {
        let mut db = database();
        db.set_class_at(DataType::Analog, 0, PointClass::Class1).unwrap();
        db.set_deadband(DataType::Analog, 0, 5.0).unwrap();

        // Quality change from restart to online
        assert!(db.update(Analog::new(0.0), 0).unwrap());
        assert!(!db.update(Analog::new(4.0), 0).unwrap());
        assert!(!db.update(Analog::new(-5.0), 0).unwrap());
        assert!(db.update(Analog::new(5.5), 0).unwrap());
        // Measured from the last event value, not the last stored value
        assert!(!db.update(Analog::new(10.0), 0).unwrap());
        assert_eq!(db.get::<Analog>(0).unwrap().value, 10.0);

        assert_eq!(db.sink().len(), 2);
        assert!(db.sink().iter().all(|(_, class)| *class == PointClass::Class1));
    }

    #[test]
    fn test_counter_deadband() {
        let mut db = database();
        db.set_deadband(DataType::Counter, 2, 10.0).unwrap();
        db.update(Counter::new(0), 2).unwrap();
        assert!(!db.update(Counter::new(10), 2).unwrap());
        assert!(db.update(Counter::new(11), 2).unwrap());
        assert_eq!(db.record::<Counter>(2).unwrap().deadband, 10.0);
    }

    #[test]
    fn test_status_points_never_raise_events() {
        let mut db = database();
        assert!(db.update(ControlStatus::new(true), 0).unwrap());
        assert!(db.update(SetpointStatus::new(3.5), 0).unwrap());
        assert!(db.sink().is_empty());
        assert!(db.get::<ControlStatus>(0).unwrap().value);
    }

    #[test]
    fn test_index_out_of_bounds() {
        let mut db = database();
        let err = db.update(Analog::new(1.0), 3).unwrap_err();
        assert!(matches!(
            err,
            Dnp3Error::IndexOutOfBounds { data_type: DataType::Analog, index: 3, count: 3, .. }
        ));
        assert!(err.location().is_some());

        assert!(db.set_class_at(DataType::Counter, 9, PointClass::Class1).is_err());
        assert!(db.set_deadband(DataType::Analog, 3, 1.0).is_err());
        assert!(db.get::<Binary>(3).is_err());
    }

    #[test]
    fn test_class_not_assignable_for_status() {
        let mut db = database();
        for data_type in [DataType::ControlStatus, DataType::SetpointStatus] {
            assert!(matches!(
                db.set_class(data_type, PointClass::Class1),
                Err(Dnp3Error::ClassNotAssignable(t)) if t == data_type
            ));
            assert!(db.set_class_at(data_type, 0, PointClass::Class1).is_err());
        }
    }

    #[test]
    fn test_deadband_not_assignable() {
        let mut db = database();
        for data_type in [DataType::Binary, DataType::ControlStatus, DataType::SetpointStatus] {
            let err = db.set_deadband(data_type, 0, 1.0).unwrap_err();
            assert!(matches!(err, Dnp3Error::DeadbandNotAssignable(_)));
            assert!(err.is_contract_violation());
        }
    }

    #[test]
    fn test_configure_template() {
        let template = DeviceTemplate::new(2, 3, 1, 1, 2)
            .start_online(true)
            .event_class(PointClass::Class3)
            .analog_deadband(0.5);

        let mut db = Database::new();
        db.configure_template(&template).unwrap();

        assert_eq!(db.num_type(DataType::Binary), 2);
        assert_eq!(db.num_type(DataType::SetpointStatus), 2);
        assert_eq!(db.record::<Analog>(2).unwrap().class, PointClass::Class3);
        assert_eq!(db.record::<Analog>(2).unwrap().deadband, 0.5);
        assert_eq!(db.record::<Counter>(0).unwrap().class, PointClass::Class3);
        assert_eq!(db.record::<ControlStatus>(0).unwrap().class, PointClass::Class0);
        assert_eq!(db.get::<Counter>(0).unwrap().quality, Quality::Online);
        assert_eq!(template.analog[1].name, "AI1");
    }

    #[test]
    fn test_load_measurements() {
        let mut db = database();
        let changed = db
            .load(&[
                Measurement::Binary(Binary::new(true), 0),
                Measurement::Analog(Analog::new(2.0), 1),
                Measurement::SetpointStatus(SetpointStatus::new(1.0), 2),
            ])
            .unwrap();
        assert_eq!(changed, 3);
        assert_eq!(db.sink().len(), 2);

        assert!(db.load(&[Measurement::Counter(Counter::new(1), 5)]).is_err());
    }

    #[test]
    fn test_unbounded_sender_sink() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut db = Database::with_sink(tx);
        db.configure(DataType::Counter, 1, true);
        db.update(Counter::new(7), 0).unwrap();

        let (event, class) = rx.try_recv().unwrap();
        assert_eq!(event, Measurement::Counter(Counter::new(7), 0));
        assert_eq!(class, PointClass::Class0);
    }

    #[test]
    fn test_records_view() {
        let mut db = database();
        db.update(Analog::new(9.0), 2).unwrap();
        let values: Vec<f64> = db.records::<Analog>().iter().map(|r| r.point.value).collect();
        assert_eq!(values, vec![0.0, 0.0, 9.0]);
    }
}
