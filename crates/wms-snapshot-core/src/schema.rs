//! Column names and fixed settings shared by every stage of the snapshot pipeline.

use chrono_tz::Tz;

// ── Warehouse extract ───────────────────────────────────────────────────────
pub mod warehouse {
    pub const POSICION: &str = "posicion";
    pub const LOTE: &str = "lote";
    pub const FECHA_VENCIMIENTO: &str = "fecha_vencimiento";

    /// Columns read as text regardless of what the CSV reader would infer.
    pub const TEXT_COLUMNS: [&str; 2] = [LOTE, FECHA_VENCIMIENTO];
}

// ── Position attributes extract ─────────────────────────────────────────────
pub mod position {
    pub const PREFIX: &str = "pos_";
}

// ── Derived columns ─────────────────────────────────────────────────────────
pub mod derived {
    pub const CREATED_AT: &str = "created_at";
    pub const TURNO: &str = "turno";
}

/// Join key shared by both extracts. Never prefixed.
pub const JOIN_KEY: &str = warehouse::POSICION;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Timezone the shift label is computed in.
pub const SHIFT_TIMEZONE: Tz = chrono_tz::America::Santiago;

pub const DEFAULT_DESTINATION_TABLE: &str = "data_espol.stock_wms_historico";
pub const DEFAULT_PROJECT_ID: &str = "analitica-avanzada-338715";

/// How a flag column is normalized before upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagRule {
    /// Strict integer cast, then nulls become 0.
    ZeroIfMissing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagColumn {
    pub name: &'static str,
    pub rule: FlagRule,
}

impl FlagColumn {
    pub const fn zero_if_missing(name: &'static str) -> Self {
        Self {
            name,
            rule: FlagRule::ZeroIfMissing,
        }
    }
}

/// Boolean-like columns of the joined table. Both the unprefixed warehouse
/// flags and the `pos_` flags coming from the position attributes file.
pub const FLAG_COLUMNS: [FlagColumn; 11] = [
    FlagColumn::zero_if_missing("sensible"),
    FlagColumn::zero_if_missing("inflamable"),
    FlagColumn::zero_if_missing("perfumante"),
    FlagColumn::zero_if_missing("sensible_temperatura"),
    FlagColumn::zero_if_missing("liquido"),
    FlagColumn::zero_if_missing("fragil"),
    FlagColumn::zero_if_missing("pos_sensible"),
    FlagColumn::zero_if_missing("pos_inflamable"),
    FlagColumn::zero_if_missing("pos_perfumantes"),
    FlagColumn::zero_if_missing("pos_sensible_temperatura"),
    FlagColumn::zero_if_missing("pos_pulmon"),
];
