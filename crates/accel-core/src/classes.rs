//! Class label table for the deployed detection graph.

/// Labels indexed by NMS class id (class zero is background).
#[derive(Clone, Debug)]
pub struct ClassLabels {
    names: Vec<String>,
}

impl ClassLabels {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn name(&self, class_id: u32) -> &str {
        self.names
            .get(class_id as usize)
            .map(String::as_str)
            .unwrap_or("N/A")
    }
}

impl Default for ClassLabels {
    fn default() -> Self {
        Self::new(
            ["__background__", "bike", "car", "person"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_ids_map_to_placeholder() {
        let labels = ClassLabels::default();
        assert_eq!(labels.name(1), "bike");
        assert_eq!(labels.name(2), "car");
        assert_eq!(labels.name(3), "person");
        assert_eq!(labels.name(9), "N/A");
    }
}
