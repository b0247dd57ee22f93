/*
Decodes the single status line printed by the `aurora` acquisition tool when run with `-c -d0 -e`
(columnized DSP values followed by energy counters and a status word).

The line is positional. Which token means what is pinned down in a versioned `PositionalSchema`
so a change in the tool's output only means adding a new schema constant.
*/

// USE STATEMENTS
    use thiserror::Error;

// CONSTANTS
    pub const STATUS_OK: &str = "OK";
    // tool reports daily energy in kWh, pvoutput expects Wh
    const KWH_TO_WH: f64 = 1000.0;

/// Token positions (0-based) used from the acquisition tool output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PositionalSchema {
    pub version: u32,
    // numeric tokens before the trailing status token
    pub numeric_fields: usize,
    pub daily_energy: usize,
    pub string_power: [usize; 2],
    pub grid_voltage: usize,
    pub inverter_temp: usize,
}

pub const AURORA_SCHEMA_V1: PositionalSchema = PositionalSchema {
    version: 1,
    numeric_fields: 20,
    daily_energy: 13,
    string_power: [16, 17],
    grid_voltage: 6,
    inverter_temp: 11,
};

impl PositionalSchema {
    fn token_count(&self) -> usize {
        self.numeric_fields + 1
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("expected {expected} tokens (schema v{schema}), found {found}")]
    TokenCount { schema: u32, expected: usize, found: usize },
    #[error("status token is '{0}', expected 'OK'")]
    Status(String),
    #[error("token {index} ('{token}') is not a number")]
    NotNumeric { index: usize, token: String },
    #[error("{field} is negative: {value}")]
    Negative { field: &'static str, value: f64 },
}

/// Numeric tokens of one status line, in output order, with the status word already checked.
#[derive(Clone, Debug, PartialEq)]
pub struct RawReading {
    values: Vec<f64>,
}

impl RawReading {
    pub fn from_line(line: &str, schema: &PositionalSchema) -> Result<Self, ParseError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() != schema.token_count() {
            return Err(ParseError::TokenCount {
                schema: schema.version,
                expected: schema.token_count(),
                found: tokens.len(),
            });
        }

        // token_count() >= 1 so the split can't fail
        let Some((status, numeric)) = tokens.split_last() else {
            return Err(ParseError::TokenCount { schema: schema.version, expected: schema.token_count(), found: 0 });
        };
        if *status != STATUS_OK {
            return Err(ParseError::Status(status.to_string()));
        }

        let mut values = Vec::with_capacity(numeric.len());
        for (index, token) in numeric.iter().enumerate() {
            match token.parse::<f64>() {
                Ok(val) if val.is_finite() => values.push(val),
                _ => return Err(ParseError::NotNumeric { index, token: token.to_string() }),
            }
        }
        Ok(Self { values })
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
}

/// What a run uploads: energy produced so far today and current output of both strings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Reading {
    pub daily_energy_wh: f64,
    pub total_power_w: f64,
    pub inverter_temp_c: f64,
    pub grid_voltage_v: f64,
}

impl Reading {
    pub fn from_raw(raw: &RawReading, schema: &PositionalSchema) -> Result<Self, ParseError> {
        let daily_energy_wh = non_negative("daily energy", field(raw, schema, schema.daily_energy)?)? * KWH_TO_WH;
        let string1_w = non_negative("string 1 power", field(raw, schema, schema.string_power[0])?)?;
        let string2_w = non_negative("string 2 power", field(raw, schema, schema.string_power[1])?)?;

        Ok(Self {
            daily_energy_wh,
            total_power_w: string1_w + string2_w,
            inverter_temp_c: field(raw, schema, schema.inverter_temp)?,
            grid_voltage_v: field(raw, schema, schema.grid_voltage)?,
        })
    }
}

fn field(raw: &RawReading, schema: &PositionalSchema, index: usize) -> Result<f64, ParseError> {
    // a schema pointing past its own field count is reported like a short line
    raw.get(index).ok_or(ParseError::TokenCount {
        schema: schema.version,
        expected: index + 2,
        found: raw.len() + 1,
    })
}

fn non_negative(field: &'static str, value: f64) -> Result<f64, ParseError> {
    if value < 0.0 {
        Err(ParseError::Negative { field, value })
    } else {
        Ok(value)
    }
}

pub fn parse(raw_text: &str) -> Result<Reading, ParseError> {
    parse_with(raw_text, &AURORA_SCHEMA_V1)
}

pub fn parse_with(raw_text: &str, schema: &PositionalSchema) -> Result<Reading, ParseError> {
    let raw = RawReading::from_line(raw_text, schema)?;
    Reading::from_raw(&raw, schema)
}
