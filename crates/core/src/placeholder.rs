/// Reserved prompt placeholder for a prerequisite skill's output.
pub const PRIOR_OUTPUT: &str = "{{prior_output}}";

/// Reserved prompt placeholder for the research question being answered.
pub const QUESTION: &str = "{{question}}";

pub const RESERVED: [&str; 2] = [PRIOR_OUTPUT, QUESTION];
