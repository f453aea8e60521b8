//! Read-only attribute files.
//!
//! Attributes are shown on demand through [`Attribute::show`]; a [`KObject`]
//! mirrors them as plain files under a directory so that other processes
//! can read them, e.g. `<root>/WeatherKObject/WeatherAttrGroup/period_ms`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, warn};

use crate::error::*;
use crate::period::PeriodState;

pub const KOBJECT_NAME: &str = "WeatherKObject";
pub const ATTR_GROUP_NAME: &str = "WeatherAttrGroup";
pub const PERIOD_ATTR_NAME: &str = "period_ms";

pub trait Attribute: Send + Sync {
    fn name(&self) -> &str;
    fn show(&self) -> String;
}

/// `period_ms`: the current period in decimal followed by a newline.
pub struct PeriodAttribute {
    state: Arc<PeriodState>,
}

impl PeriodAttribute {
    pub fn new(state: Arc<PeriodState>) -> PeriodAttribute {
        PeriodAttribute { state }
    }
}

impl Attribute for PeriodAttribute {
    fn name(&self) -> &str {
        PERIOD_ATTR_NAME
    }

    fn show(&self) -> String {
        format!("{}\n", self.state.period_ms())
    }
}

pub struct AttributeGroup {
    pub name: &'static str,
    pub attrs: Vec<Box<dyn Attribute>>,
}

impl AttributeGroup {
    pub fn weather(state: Arc<PeriodState>) -> AttributeGroup {
        AttributeGroup {
            name: ATTR_GROUP_NAME,
            attrs: vec![Box::new(PeriodAttribute::new(state))],
        }
    }
}

pub struct KObject {
    dir: PathBuf,
    group: AttributeGroup,
    removed: AtomicBool,
}

impl KObject {
    /// Creates `<parent>/<name>/<group>/` and writes every attribute.
    pub fn create(parent: &Path, name: &str, group: AttributeGroup) -> Result<KObject> {
        let dir = parent.join(name);
        fs::create_dir_all(dir.join(group.name))?;
        let kobj = KObject {
            dir,
            group,
            removed: AtomicBool::new(false),
        };
        if let Err(e) = kobj.refresh() {
            kobj.remove();
            return Err(e);
        }
        Ok(kobj)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn attr_path(&self, attr: &str) -> PathBuf {
        self.dir.join(self.group.name).join(attr)
    }

    /// Shows `attr` without touching the filesystem.
    pub fn show(&self, attr: &str) -> Option<String> {
        self.group.attrs.iter().find(|a| a.name() == attr).map(|a| a.show())
    }

    /// Rewrites every attribute file with its current value.
    pub fn refresh(&self) -> Result<()> {
        if self.removed.load(Ordering::Acquire) {
            return Ok(());
        }
        for attr in self.group.attrs.iter() {
            let path = self.attr_path(attr.name());
            let tmp = path.with_extension("tmp");
            fs::write(&tmp, attr.show())?;
            fs::rename(&tmp, &path)?;
        }
        Ok(())
    }

    /// Deletes the object directory. Only the first call does anything.
    pub fn remove(&self) {
        if self.removed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("BME280: removing {}", self.dir.display());
        if let Err(e) = fs::remove_dir_all(&self.dir) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("BME280: failed to remove {}: {}", self.dir.display(), e);
            }
        }
    }
}

impl Drop for KObject {
    fn drop(&mut self) {
        self.remove();
    }
}

/// Reads `period_ms` as published under `root`.
pub fn read_period(root: &Path) -> Result<i32> {
    let path = root.join(KOBJECT_NAME).join(ATTR_GROUP_NAME).join(PERIOD_ATTR_NAME);
    let text = fs::read_to_string(path)?;
    text.trim_end()
        .parse()
        .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::InvalidData, e)))
}
