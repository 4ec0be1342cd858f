use docreview_skills::{populate, AgentInternals, ContextField, SkillDefinition};
use proptest::prelude::*;

/// Text made of plain words with named markers sprinkled in.
fn template_text() -> impl Strategy<Value = String> {
    let piece = prop_oneof![
        "[a-z ]{0,12}",
        proptest::sample::select(ContextField::ALL.to_vec()).prop_map(|f| f.named_marker()),
    ];
    proptest::collection::vec(piece, 0..12).prop_map(|pieces| pieces.concat())
}

fn replacements() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec("[a-zA-Z0-9 .,]{0,16}", ContextField::ALL.len())
}

fn filled(values: &[String]) -> AgentInternals {
    AgentInternals::named().with_replacements(|field| {
        ContextField::ALL
            .iter()
            .position(|f| *f == field)
            .map(|idx| values[idx].clone())
    })
}

proptest! {
    #[test]
    fn populate_is_idempotent(instructions in template_text(), values in replacements()) {
        let internals = filled(&values);
        let skill = SkillDefinition::new("s", "", instructions);
        let once = populate(&skill, &internals);
        let twice = populate(&SkillDefinition::new("s", "", once.clone()), &internals);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn empty_replacements_strip_every_marker(instructions in template_text()) {
        let internals = AgentInternals::named();
        let skill = SkillDefinition::new("s", "", instructions.clone());
        let mut expected = instructions;
        for field in ContextField::ALL {
            expected = expected.replace(&field.named_marker(), "");
        }
        prop_assert_eq!(populate(&skill, &internals), expected);
    }
}
