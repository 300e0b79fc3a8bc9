use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Pending,
    Build,
    Run,
    WaitReady,
    Act,
    Collect,
    Teardown,
}

pub fn valid_phase_transition(src: &Phase, dst: &Phase) -> bool {
    let phase_transition_map: HashMap<Phase, Vec<Phase>> = {
        let mut map = HashMap::new();
        map.insert(Phase::Pending, vec![Phase::Build, Phase::Run, Phase::Teardown]);
        map.insert(Phase::Build, vec![Phase::Build, Phase::Run, Phase::Teardown]);
        map.insert(
            Phase::Run,
            vec![Phase::Build, Phase::Run, Phase::WaitReady, Phase::Act, Phase::Teardown],
        );
        map.insert(
            Phase::WaitReady,
            vec![Phase::WaitReady, Phase::Act, Phase::Teardown],
        );
        map.insert(Phase::Act, vec![Phase::Collect, Phase::Teardown]);
        map.insert(Phase::Collect, vec![Phase::Teardown]);
        map.insert(Phase::Teardown, vec![]);
        map
    };

    if let Some(valid_phases) = phase_transition_map.get(src) {
        valid_phases.contains(dst)
    } else {
        false
    }
}
