//! Explicit task list polled by the control loop once per iteration.

use std::time::Duration;

use chrono::{NaiveDateTime, NaiveTime, TimeDelta};

use crate::camera::CameraIdentity;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Every(Duration),
    DailyAt(NaiveTime),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    Rotate(CameraIdentity),
    RetentionSweep,
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Interval(TimeDelta),
    Daily(NaiveTime),
}

impl Step {
    /// `None` once the next run falls past the last representable timestamp.
    fn next_after(self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        match self {
            Step::Interval(step) => now.checked_add_signed(step),
            Step::Daily(time) => {
                let today = now.date().and_time(time);
                if today > now {
                    Some(today)
                } else {
                    today.checked_add_signed(TimeDelta::days(1))
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Task {
    job: Job,
    step: Step,
    next_due: NaiveDateTime,
}

#[derive(Debug, Clone, Default)]
pub struct Schedule {
    tasks: Vec<Task>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `job`; its first run is one interval after `now`, or the next
    /// occurrence of the daily time strictly after `now`.
    pub fn add(&mut self, trigger: Trigger, job: Job, now: NaiveDateTime) -> Result<()> {
        let step = match trigger {
            Trigger::Every(interval) => {
                let step = TimeDelta::from_std(interval)
                    .ok()
                    .filter(|step| *step > TimeDelta::zero())
                    .ok_or_else(|| {
                        Error::InvalidConfig(format!(
                            "interval for {job:?} must be positive, got {}",
                            humantime::format_duration(interval)
                        ))
                    })?;
                Step::Interval(step)
            }
            Trigger::DailyAt(time) => Step::Daily(time),
        };
        let next_due = step.next_after(now).ok_or_else(|| {
            Error::InvalidConfig(format!("first run of {job:?} falls past the end of time"))
        })?;
        self.tasks.push(Task {
            job,
            step,
            next_due,
        });
        Ok(())
    }

    /// Jobs due at `now`, in registration order. Each returned job is
    /// rescheduled relative to `now`, so a late loop does not replay missed runs.
    pub fn due(&mut self, now: NaiveDateTime) -> Vec<Job> {
        let mut due = Vec::new();
        for task in &mut self.tasks {
            if task.next_due <= now {
                due.push(task.job.clone());
                task.next_due = task.step.next_after(now).unwrap_or(NaiveDateTime::MAX);
            }
        }
        due
    }

    pub fn remove_camera(&mut self, id: &CameraIdentity) {
        self.tasks
            .retain(|task| !matches!(&task.job, Job::Rotate(camera) if camera == id));
    }

    pub fn next_due(&self) -> Option<NaiveDateTime> {
        self.tasks.iter().map(|task| task.next_due).min()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
