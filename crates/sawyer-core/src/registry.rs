use once_cell::sync::Lazy;

/// Name, call shape and purpose of a rule function that rule files may reference.
#[derive(Debug, Clone)]
pub struct FunctionDescriptor {
    pub code: &'static str,
    pub aliases: &'static [&'static str],
    /// Parameter names in positional order.
    pub parameters: &'static [&'static str],
    /// Number of external series the function consumes (gap-fill only).
    pub required_sources: usize,
    pub description: &'static str,
}

impl FunctionDescriptor {
    pub fn answers_to(&self, name: &str) -> bool {
        self.code == name || self.aliases.contains(&name)
    }

    pub fn requires_sources(&self) -> bool {
        self.required_sources > 0
    }
}

pub const DEFAULT_QA_FUNCTION: &str = "mask_by_datetime";

static QA_FUNCTIONS: Lazy<Vec<FunctionDescriptor>> = Lazy::new(|| {
    vec![
        FunctionDescriptor {
            code: "mask_by_datetime",
            aliases: &["mask_by_window"],
            parameters: &[],
            required_sources: 0,
            description: "Mask every selected cell in the window",
        },
        FunctionDescriptor {
            code: "scale_by_multiplier",
            aliases: &[],
            parameters: &["multiplier"],
            required_sources: 0,
            description: "Multiply selected cells by a constant (no removal)",
        },
        FunctionDescriptor {
            code: "mask_by_comparison",
            aliases: &[],
            parameters: &["comparison", "cval"],
            required_sources: 0,
            description: "Mask cells whose own value is above/below/equal to cval, or NaN",
        },
        FunctionDescriptor {
            code: "mask_by_comparison_ind",
            aliases: &[],
            parameters: &["indvar", "comparison", "cval"],
            required_sources: 0,
            description: "Mask rows where an independent column compares to cval",
        },
        FunctionDescriptor {
            code: "mask_by_rolling_stat",
            aliases: &[],
            parameters: &["indvar", "stat", "window", "comparison", "thresh"],
            required_sources: 0,
            description: "Mask rows where an independent column departs from its centered rolling mean/median",
        },
    ]
});

static GAPFILL_FUNCTIONS: Lazy<Vec<FunctionDescriptor>> = Lazy::new(|| {
    vec![
        FunctionDescriptor {
            code: "fillna",
            aliases: &[],
            parameters: &["value", "method", "limit"],
            required_sources: 0,
            description: "Fill with a constant or by carrying values forward/backward",
        },
        FunctionDescriptor {
            code: "interpolate",
            aliases: &[],
            parameters: &["method", "limit"],
            required_sources: 0,
            description: "Linear or time-weighted interpolation across gaps",
        },
        FunctionDescriptor {
            code: "substitution",
            aliases: &[],
            parameters: &[],
            required_sources: 1,
            description: "Copy values from one source series into gaps",
        },
        FunctionDescriptor {
            code: "midpoint",
            aliases: &[],
            parameters: &[],
            required_sources: 2,
            description: "Fill with the mean of two source series",
        },
        FunctionDescriptor {
            code: "linearfit",
            aliases: &[],
            parameters: &["zero_intcpt"],
            required_sources: 1,
            description: "Least-squares linear fit against one source series",
        },
        FunctionDescriptor {
            code: "linearfit2",
            aliases: &[],
            parameters: &["zero_intcpt"],
            required_sources: 1,
            description: "Linear fit against one source series by numerical SSE minimisation",
        },
    ]
});

pub fn all_qa_functions() -> &'static [FunctionDescriptor] {
    QA_FUNCTIONS.as_slice()
}

pub fn all_gapfill_functions() -> &'static [FunctionDescriptor] {
    GAPFILL_FUNCTIONS.as_slice()
}

pub fn find_qa_function(name: &str) -> Option<&'static FunctionDescriptor> {
    all_qa_functions().iter().find(|desc| desc.answers_to(name))
}

pub fn find_gapfill_function(name: &str) -> Option<&'static FunctionDescriptor> {
    all_gapfill_functions().iter().find(|desc| desc.answers_to(name))
}
