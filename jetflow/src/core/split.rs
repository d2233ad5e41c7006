/// one assignable unit of source input, with optional data-locality hints
#[derive(Clone, Serialize, Deserialize, Debug, Eq, PartialEq)]
pub struct InputSplit {
    index: u32,
    /// cluster-level addresses of members holding the split's data locally
    locations: Vec<String>,
}

impl InputSplit {
    pub fn new(index: u32, locations: Vec<String>) -> Self {
        InputSplit { index, locations }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn locations(&self) -> &[String] {
        &self.locations
    }
}
