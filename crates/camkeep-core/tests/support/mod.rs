#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use camkeep_core::backend::{CaptureSource, FrameWriter, StreamParams, VideoBackend};
use camkeep_core::{Error, Result};
use chrono::{NaiveDate, NaiveDateTime};

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .and_then(|date| date.and_hms_opt(h, min, s))
        .expect("valid timestamp")
}

/// Everything the fake writers did, in order.
#[derive(Debug, Default)]
pub struct Journal {
    pub opened: Vec<PathBuf>,
    pub released: Vec<PathBuf>,
    pub frames: Vec<(PathBuf, u32)>,
    pub captures_released: usize,
    pub params: Vec<StreamParams>,
}

impl Journal {
    pub fn frames_in(&self, path: &Path) -> Vec<u32> {
        self.frames
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, f)| *f)
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Read {
    Frame(u32),
    Empty,
}

/// Test-side handle onto one scripted stream.
#[derive(Clone)]
pub struct Stream {
    pub open: Rc<Cell<bool>>,
    pub reads: Rc<RefCell<VecDeque<Read>>>,
    pub size: (i32, i32),
    next_frame: Rc<Cell<u32>>,
}

impl Stream {
    pub fn new(size: (i32, i32)) -> Self {
        Self {
            open: Rc::new(Cell::new(true)),
            reads: Rc::new(RefCell::new(VecDeque::new())),
            size,
            next_frame: Rc::new(Cell::new(1)),
        }
    }

    pub fn script(&self, reads: impl IntoIterator<Item = Read>) {
        self.reads.borrow_mut().extend(reads);
    }
}

#[derive(Clone, Default)]
pub struct FakeBackend {
    pub journal: Rc<RefCell<Journal>>,
    streams: Rc<RefCell<HashMap<String, Stream>>>,
    pub fail_writes: Rc<Cell<bool>>,
    pub write_delay: Rc<Cell<Option<Duration>>>,
}

impl FakeBackend {
    pub fn with_stream(self, url: &str, stream: &Stream) -> Self {
        self.streams
            .borrow_mut()
            .insert(url.to_string(), stream.clone());
        self
    }
}

pub struct FakeCapture {
    stream: Option<Stream>,
    journal: Rc<RefCell<Journal>>,
}

pub struct FakeWriter {
    path: PathBuf,
    file: File,
    journal: Rc<RefCell<Journal>>,
    fail_writes: Rc<Cell<bool>>,
    write_delay: Rc<Cell<Option<Duration>>>,
}

impl VideoBackend for FakeBackend {
    type Frame = u32;
    type Capture = FakeCapture;
    type Writer = FakeWriter;

    fn open_capture(&mut self, url: &str) -> Result<FakeCapture> {
        Ok(FakeCapture {
            stream: self.streams.borrow().get(url).cloned(),
            journal: self.journal.clone(),
        })
    }

    fn open_writer(&mut self, path: &Path, params: &StreamParams) -> Result<FakeWriter> {
        let file = File::create(path).map_err(|err| Error::WriterOpen {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        {
            let mut journal = self.journal.borrow_mut();
            journal.opened.push(path.to_path_buf());
            journal.params.push(params.clone());
        }
        Ok(FakeWriter {
            path: path.to_path_buf(),
            file,
            journal: self.journal.clone(),
            fail_writes: self.fail_writes.clone(),
            write_delay: self.write_delay.clone(),
        })
    }
}

impl CaptureSource for FakeCapture {
    type Frame = u32;

    fn is_open(&self) -> bool {
        self.stream.as_ref().is_some_and(|s| s.open.get())
    }

    fn read_frame(&mut self) -> Result<Option<u32>> {
        let Some(stream) = &self.stream else {
            return Ok(None);
        };
        let next = stream.reads.borrow_mut().pop_front();
        match next {
            Some(Read::Frame(frame)) => Ok(Some(frame)),
            Some(Read::Empty) => Ok(None),
            None => {
                let frame = stream.next_frame.get();
                stream.next_frame.set(frame + 1);
                Ok(Some(frame))
            }
        }
    }

    fn frame_size(&self) -> Result<(i32, i32)> {
        Ok(self.stream.as_ref().map_or((0, 0), |s| s.size))
    }

    fn release(&mut self) -> Result<()> {
        self.journal.borrow_mut().captures_released += 1;
        Ok(())
    }
}

impl FrameWriter for FakeWriter {
    type Frame = u32;

    fn write_frame(&mut self, frame: &u32) -> Result<()> {
        if self.fail_writes.get() {
            return Err(Error::WriteFailed("disk full".into()));
        }
        if let Some(delay) = self.write_delay.get() {
            std::thread::sleep(delay);
        }
        writeln!(self.file, "{frame}").map_err(|err| Error::WriteFailed(err.to_string()))?;
        self.journal
            .borrow_mut()
            .frames
            .push((self.path.clone(), *frame));
        Ok(())
    }

    fn release(self) -> Result<()> {
        self.journal.borrow_mut().released.push(self.path);
        Ok(())
    }
}
