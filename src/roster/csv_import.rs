use crate::model::Participant;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum RosterError {
    #[error("could not open roster file: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse roster csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("roster has no `Number` column")]
    MissingKeyColumn,
}

/// Columns the current `Participant` shape interprets directly; anything
/// else in the header lands in `Participant::extra` (`spec.md` §9's
/// "heterogeneous keys" redesign, see `model::Participant`).
const KNOWN_COLUMNS: &[&str] = &[
    "number",
    "driver",
    "nome",
    "team",
    "sponsors",
    "metatag",
    "folder_1",
    "folder_2",
    "folder_3",
];

/// Load a roster CSV using the documented template header (`spec.md` §6):
/// `Number,Driver,Team,Category,Plate_Number,Sponsors,Metatag,Folder_1,Folder_2,Folder_3`.
/// Column matching is case-insensitive; columns beyond the documented set
/// (e.g. `Category`, `Plate_Number`) are preserved in `Participant::extra`
/// rather than rejected, so future template extensions don't break import.
pub fn load_roster(path: &Path) -> Result<Vec<Participant>, RosterError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)?;

    let raw_headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    let headers: Vec<String> = raw_headers.iter().map(|h| h.to_ascii_lowercase()).collect();

    if !headers.iter().any(|h| h == "number") {
        return Err(RosterError::MissingKeyColumn);
    }

    let mut participants = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: Vec<(&str, &str)> = headers
            .iter()
            .map(|h| h.as_str())
            .zip(record.iter())
            .collect();

        let get = |key: &str| -> Option<String> {
            row.iter()
                .find(|(h, _)| *h == key)
                .map(|(_, v)| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut extra = std::collections::HashMap::new();
        for (header, raw_header) in headers.iter().zip(raw_headers.iter()) {
            if KNOWN_COLUMNS.contains(&header.as_str()) {
                continue;
            }
            if let Some(value) = get(header) {
                extra.insert(raw_header.clone(), value);
            }
        }

        participants.push(Participant {
            numero: get("number").unwrap_or_default(),
            // Legacy single-`nome` roster variant (`spec.md` §6): falls back
            // to it only when the documented `Driver` column is absent.
            nome_pilota: get("driver").or_else(|| get("nome")),
            nome_navigatore: None,
            nome_terzo: None,
            nome_quarto: None,
            squadra: get("team"),
            sponsors: get("sponsors"),
            metatag: get("metatag"),
            folder_1: get("folder_1"),
            folder_2: get("folder_2"),
            folder_3: get("folder_3"),
            extra,
        });
    }

    Ok(participants)
}
