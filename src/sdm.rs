//! The thread-safe queue where sensor readers drop [`SensorEvent`]s for the
//! guidance loop to pick up.

use crate::sensor_data_manager::{SensorDataManager, SensorEvent};
use crate::sensor_message_decoder::SensorMessage;

use log::{debug, warn};
use std::{
    collections::VecDeque,
    io::{self, BufRead, BufReader, Read},
    str::{self, FromStr},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
};

/// A [`SensorDataManager`] that simply acts as a thread-safe buffer. Clones
/// share the same queue, so a reader thread can hold one while the session
/// drains another. Closing any clone closes them all.
#[derive(Debug, Default, Clone)]
pub struct Sdm {
    events: Arc<Mutex<VecDeque<SensorEvent>>>,
    closed: Arc<AtomicBool>,
}

impl Sdm {
    /// Instantiates a new [`Sdm`] with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event to the back of the queue. Dropped once closed.
    pub fn add_event(&self, event: SensorEvent) {
        if self.is_closed() {
            return;
        }
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(event);
    }

    /// Appends whatever the decoded message amounts to, if anything.
    pub fn add_message(&self, message: SensorMessage) {
        match message.into_event() {
            Some(event) => self.add_event(event),
            None => debug!("Position receiver has no fix yet"),
        }
    }

    /// Number of events waiting.
    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether [`SensorDataManager::close`] was called on any clone.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Whether no events are waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Iterator for Sdm {
    type Item = SensorEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}

impl SensorDataManager for Sdm {
    fn clear(&mut self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
        self.clear();
    }
}

/// Reads newline-terminated sensor messages from `reader` until it runs dry,
/// decoding each one into `sdm`. Undecodable lines are logged and skipped.
/// Returns after the next line once `sdm` has been closed.
pub fn pump_lines<R: Read>(reader: R, sdm: &Sdm) -> io::Result<()> {
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        if sdm.is_closed() {
            return Ok(());
        }
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(());
        }

        match str::from_utf8(&line) {
            Ok(s) if s.trim().is_empty() => {}
            Ok(s) => match SensorMessage::from_str(s) {
                Ok(message) => {
                    debug!("Received {:?}, adding to SDM", message);
                    sdm.add_message(message);
                }
                Err(e) => {
                    warn!("Was unable to parse sensor message: {:?}", e);
                }
            },
            // Often happens at the beginning of transmission when
            // there is still garbage in the hardware buffer
            Err(e) => {
                warn!("Failed to decode utf-8: {:?}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor_data_manager::OrientationSample;
    use std::io::Cursor;

    #[test]
    fn events_come_out_in_arrival_order() {
        let mut sdm = Sdm::new();
        sdm.add_event(SensorEvent::Orientation(OrientationSample::Compass(1.0)));
        sdm.add_event(SensorEvent::Orientation(OrientationSample::Compass(2.0)));

        let drained: Vec<_> = sdm.by_ref().collect();
        assert_eq!(
            drained,
            vec![
                SensorEvent::Orientation(OrientationSample::Compass(1.0)),
                SensorEvent::Orientation(OrientationSample::Compass(2.0)),
            ]
        );
        assert!(sdm.is_empty());
    }

    #[test]
    fn clones_share_the_queue() {
        let writer = Sdm::new();
        let mut reader = writer.clone();
        writer.add_event(SensorEvent::PositionError("lost".into()));
        assert_eq!(reader.len(), 1);
        reader.clear();
        assert!(writer.is_empty());
    }

    #[test]
    fn closed_queue_takes_no_more_events() {
        let reader_side = Sdm::new();
        let mut session_side = reader_side.clone();
        reader_side.add_event(SensorEvent::PositionError("lost".into()));

        session_side.close();
        session_side.close();
        assert!(reader_side.is_closed());
        assert!(reader_side.is_empty());

        reader_side.add_event(SensorEvent::Orientation(OrientationSample::Compass(5.0)));
        assert!(session_side.is_empty());

        let stream = b"+ORNT:90.0,0.0,0.0\n+ORNT:91.0,0.0,0.0\n";
        pump_lines(Cursor::new(&stream[..]), &reader_side).unwrap();
        assert_eq!(session_side.next(), None);
    }

    #[test]
    fn pumps_a_serial_stream() {
        let stream = b"\xff\xfe garbage\n\
            $GPRMC,015540,A,3316.800,N,13130.000,E,0.0,0.0,161026,,*15\r\n\
            not a message\n\
            \n\
            $GNRMC,081836,V,,,,,,,130998,,*21\n\
            +ORNT:90.0,0.0,0.0\n";

        let mut sdm = Sdm::new();
        pump_lines(Cursor::new(&stream[..]), &sdm).unwrap();

        let events: Vec<_> = sdm.by_ref().collect();
        assert_eq!(events.len(), 2);
        match &events[0] {
            SensorEvent::Position(p) => {
                assert!((p.latitude - 33.28).abs() < 1e-9);
                assert!((p.longitude - 131.5).abs() < 1e-9);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            events[1],
            SensorEvent::Orientation(OrientationSample::Alpha(90.0))
        );
    }
}
