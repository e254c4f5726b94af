use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};

/// Class-id to name table of the loaded model.
#[derive(Debug, Clone, Default)]
pub struct Labels {
    names: Vec<String>,
}

impl Labels {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// Reads one class per line. Anything after the first comma (the colour
    /// columns some label files carry) is ignored; blank lines are skipped.
    pub fn load(filepath: &Path) -> io::Result<Self> {
        let file = File::open(filepath)?;
        Self::from_reader(io::BufReader::new(file))
    }

    pub fn from_reader<R: BufRead>(reader: R) -> io::Result<Self> {
        let mut names = Vec::new();

        for line_result in reader.lines() {
            let line = line_result?;
            let label = line.split(',').next().unwrap_or_default().trim();
            if label.is_empty() {
                continue;
            }
            names.push(label.to_string());
        }

        if names.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Labels file contains no classes",
            ));
        }

        Ok(Self { names })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, class_id: u32) -> String {
        match self.names.get(class_id as usize) {
            Some(name) => name.clone(),
            None => format!("Unknown class {}", class_id),
        }
    }
}
