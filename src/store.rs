use std::fs;

use crate::error::{Error, Result};
use crate::models::{Region, RegionSet, Stage};
use crate::workspace::Workspace;

/// Reads and writes per-image, per-stage region sidecar files.
///
/// One record per line, five comma-separated integers: `x,y,w,h,label`.
/// File presence alone marks a stage as completed; an empty file is
/// "completed with zero regions".
#[derive(Debug, Clone)]
pub struct RegionStore {
    workspace: Workspace,
}

impl RegionStore {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }

    pub fn exists(&self, image: &str, stage: Stage) -> bool {
        self.workspace.stage_path(image, stage).exists()
    }

    /// Write all regions for one (image, stage) pair.
    ///
    /// Goes through a temporary file renamed into place, so a crash mid-write
    /// cannot leave a partial file that would read back as a completed stage.
    pub fn write(&self, image: &str, stage: Stage, regions: &[Region]) -> Result<()> {
        let path = self.workspace.stage_path(image, stage);
        let tmp = path.with_extension("txt.tmp");
        let mut text = String::new();
        for r in regions {
            text.push_str(&format!("{},{},{},{},{}\n", r.x, r.y, r.w, r.h, r.label));
        }
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Read the regions for one (image, stage) pair, in file order.
    pub fn read(&self, image: &str, stage: Stage) -> Result<RegionSet> {
        let path = self.workspace.stage_path(image, stage);
        let text = fs::read_to_string(&path)?;
        let mut regions = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            regions.push(parse_line(line).map_err(|reason| Error::MalformedRecord {
                path: path.clone(),
                line: idx + 1,
                reason,
            })?);
        }
        Ok(regions)
    }

    pub fn remove(&self, image: &str, stage: Stage) -> Result<()> {
        let path = self.workspace.stage_path(image, stage);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn path(&self, image: &str, stage: Stage) -> std::path::PathBuf {
        self.workspace.stage_path(image, stage)
    }
}

fn parse_line(line: &str) -> std::result::Result<Region, String> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != 5 {
        return Err(format!("expected 5 fields, got {}", fields.len()));
    }
    let int = |s: &str| {
        s.parse::<i64>()
            .map_err(|_| format!("not an integer: {s:?}"))
    };
    let x = int(fields[0])?;
    let y = int(fields[1])?;
    let w = int(fields[2])?;
    let h = int(fields[3])?;
    let label = int(fields[4])?;
    if w < 0 || h < 0 {
        return Err(format!("negative dimensions: {w}x{h}"));
    }
    Ok(Region {
        x: x as i32,
        y: y as i32,
        w: w as u32,
        h: h as u32,
        label: label as i32,
    })
}
