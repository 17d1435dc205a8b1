use crate::{AnnotatedCollection, BatchResult, DocumentOutput, Identifier};

/// Merge per-identifier outputs into the run's result.
///
/// One contribution is returned as-is (an unlabelled unit takes `label`).
/// Several contributions are concatenated in the given order into one
/// collection labelled `label`; units are neither merged nor deduplicated,
/// even when their text is identical. An empty input yields an empty
/// collection.
pub fn assemble(mut results: Vec<(Identifier, DocumentOutput)>, label: &str) -> BatchResult {
    if results.len() == 1
        && let Some((_, mut output)) = results.pop()
    {
        if let DocumentOutput::Unit(unit) = &mut output
            && unit.label.is_none()
        {
            unit.label = Some(label.to_string());
        }
        return BatchResult::Single(output);
    }

    let units = results
        .into_iter()
        .flat_map(|(_, output)| output.into_units())
        .collect();
    BatchResult::Concatenated(AnnotatedCollection::new(label, units))
}

/// Annotate every unit of `result` with its 1-based position under `key`.
pub fn number_units(result: &mut BatchResult, key: &str) {
    for (i, unit) in result.units_mut().iter_mut().enumerate() {
        unit.annotate(key, (i + 1).to_string());
    }
}
