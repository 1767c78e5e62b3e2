#[derive(Debug, Clone)]
pub struct Config {
    /// Cached result sets kept per table.
    pub cache_entries_per_table: usize,
    pub cache_enabled: bool,

    pub orm_default_limit: usize,          // sub-select rows per relation
    pub view_hop_limit: usize,             // backstop against projection cycles
    pub fuzzy_edit_distance: u8,           // max edits for fuzzy word matching
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cache_entries_per_table: 64,
            cache_enabled: true,
            orm_default_limit: 5,
            view_hop_limit: 16,
            fuzzy_edit_distance: 2,
        }
    }
}
