//! Built-in sample scenarios (office, mall fire, stadium, school).

use super::scenario::Scenario;
use crate::hazard::{Hazard, Point};

fn building(name: &str, exits: &[Point], num_agents: usize, panic: f32, time_steps: usize) -> Scenario {
    let mut s = Scenario::open_room(exits.to_vec(), num_agents, time_steps);
    s.name = Some(name.to_string());
    s.panic_factor = panic;
    s
}

fn walls(mut s: Scenario, segments: &[[[f32; 2]; 2]]) -> Scenario {
    s.walls.extend_from_slice(segments);
    s
}

fn clusters(mut s: Scenario, spots: &[(f32, f32, usize)]) -> Scenario {
    for &(x, y, count) in spots {
        s = s.with_cluster(x, y, count, None);
    }
    s
}

fn fire(x: f32, y: f32, radius: f32, intensity: f32) -> Hazard {
    Hazard::Fire { position: [x, y], radius, intensity, spread_rate: None, onset: 0.0 }
}

pub fn office() -> Scenario {
    let s = building("Office Building", &[[10.0, 18.0], [18.0, 10.0]], 120, 1.2, 100);
    let s = walls(
        s,
        &[
            [[2.0, 2.0], [18.0, 2.0]],
            [[2.0, 2.0], [2.0, 18.0]],
            [[18.0, 2.0], [18.0, 18.0]],
            [[2.0, 18.0], [18.0, 18.0]],
            [[6.0, 2.0], [6.0, 8.0]],
            [[12.0, 2.0], [12.0, 8.0]],
            [[6.0, 12.0], [14.0, 12.0]],
            [[14.0, 8.0], [14.0, 16.0]],
        ],
    );
    clusters(s, &[(4.0, 5.0, 20), (9.0, 5.0, 20), (15.0, 5.0, 20), (10.0, 15.0, 40), (16.0, 14.0, 20)])
}

pub fn mall_fire() -> Scenario {
    let exits = [[10.0, 1.0], [10.0, 19.0], [1.0, 10.0], [19.0, 10.0]];
    let s = building("Shopping Mall with Fire", &exits, 250, 1.5, 120);
    let s = walls(
        s,
        &[
            [[1.0, 1.0], [19.0, 1.0]],
            [[1.0, 1.0], [1.0, 19.0]],
            [[19.0, 1.0], [19.0, 19.0]],
            [[1.0, 19.0], [19.0, 19.0]],
            [[5.0, 1.0], [5.0, 7.0]],
            [[10.0, 1.0], [10.0, 7.0]],
            [[15.0, 1.0], [15.0, 7.0]],
            [[5.0, 13.0], [5.0, 19.0]],
            [[10.0, 13.0], [10.0, 19.0]],
            [[15.0, 13.0], [15.0, 19.0]],
            [[8.0, 8.0], [12.0, 8.0]],
            [[8.0, 8.0], [8.0, 12.0]],
            [[8.0, 12.0], [12.0, 12.0]],
            [[12.0, 8.0], [12.0, 12.0]],
        ],
    );
    let s = clusters(
        s,
        &[
            (3.0, 4.0, 30),
            (8.0, 4.0, 30),
            (13.0, 4.0, 30),
            (17.0, 4.0, 30),
            (3.0, 16.0, 30),
            (8.0, 16.0, 30),
            (13.0, 16.0, 30),
            (17.0, 16.0, 30),
            (10.0, 10.0, 40),
        ],
    );
    s.with_hazard(fire(7.0, 8.0, 2.0, 0.9))
}

pub fn stadium() -> Scenario {
    let exits = [[10.0, 1.0], [10.0, 19.0], [1.0, 10.0], [19.0, 10.0]];
    let s = building("Stadium Evacuation", &exits, 500, 1.3, 150);
    let s = walls(
        s,
        &[
            [[4.0, 1.0], [16.0, 1.0]],
            [[1.0, 5.0], [1.0, 15.0]],
            [[4.0, 19.0], [16.0, 19.0]],
            [[19.0, 5.0], [19.0, 15.0]],
            [[1.0, 5.0], [4.0, 1.0]],
            [[16.0, 1.0], [19.0, 5.0]],
            [[1.0, 15.0], [4.0, 19.0]],
            [[19.0, 15.0], [16.0, 19.0]],
            [[7.0, 4.0], [13.0, 4.0]],
            [[4.0, 8.0], [4.0, 12.0]],
            [[7.0, 16.0], [13.0, 16.0]],
            [[16.0, 8.0], [16.0, 12.0]],
            [[4.0, 8.0], [7.0, 4.0]],
            [[13.0, 4.0], [16.0, 8.0]],
            [[4.0, 12.0], [7.0, 16.0]],
            [[16.0, 12.0], [13.0, 16.0]],
        ],
    );
    clusters(
        s,
        &[
            (6.0, 3.0, 60),
            (14.0, 3.0, 60),
            (3.0, 7.0, 60),
            (3.0, 13.0, 60),
            (6.0, 17.0, 60),
            (14.0, 17.0, 60),
            (17.0, 7.0, 60),
            (17.0, 13.0, 60),
            (10.0, 10.0, 80),
        ],
    )
}

pub fn school() -> Scenario {
    let exits = [[10.0, 1.0], [10.0, 19.0], [1.0, 7.0], [19.0, 7.0]];
    let s = building("School with Multiple Hazards", &exits, 350, 1.4, 130);
    let mut s = walls(
        s,
        &[
            [[1.0, 1.0], [19.0, 1.0]],
            [[1.0, 1.0], [1.0, 19.0]],
            [[19.0, 1.0], [19.0, 19.0]],
            [[1.0, 19.0], [19.0, 19.0]],
            [[1.0, 5.0], [7.0, 5.0]],
            [[1.0, 9.0], [7.0, 9.0]],
            [[1.0, 13.0], [7.0, 13.0]],
            [[1.0, 17.0], [7.0, 17.0]],
            [[13.0, 5.0], [19.0, 5.0]],
            [[13.0, 9.0], [19.0, 9.0]],
            [[13.0, 13.0], [19.0, 13.0]],
            [[13.0, 17.0], [19.0, 17.0]],
            [[7.0, 1.0], [7.0, 19.0]],
            [[13.0, 1.0], [13.0, 19.0]],
        ],
    );
    for x in [4.0, 16.0] {
        for y in [3.0, 7.0, 11.0, 15.0] {
            s = s.with_cluster(x, y, 25, None);
        }
    }
    s.with_cluster(10.0, 10.0, 150, None)
        .with_hazard(fire(4.0, 6.0, 1.5, 0.8))
        .with_hazard(fire(16.0, 14.0, 1.5, 0.8))
        .with_hazard(Hazard::Structural { position: [10.0, 5.0], radius: 2.0, intensity: 0.7 })
}

pub fn all() -> Vec<Scenario> {
    vec![office(), mall_fire(), stadium(), school()]
}

/// Looks up a sample by short name (`office`, `mall`, `stadium`, `school`).
pub fn by_name(name: &str) -> Option<Scenario> {
    match name {
        "office" => Some(office()),
        "mall" | "mall_fire" => Some(mall_fire()),
        "stadium" => Some(stadium()),
        "school" => Some(school()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_validate_and_fill_their_population() {
        for s in all() {
            s.validate().unwrap();
            let placed = s.place_agents(1.0);
            assert_eq!(placed.len(), s.num_agents, "{:?}", s.name);
        }
    }

    #[test]
    fn samples_round_trip_through_json() {
        let school = school();
        let json = serde_json::to_string(&school).unwrap();
        let back = Scenario::from_json(&json).unwrap();
        assert_eq!(back, school);
        assert_eq!(back.hazards.len(), 3);
    }

    #[test]
    fn lookup_by_name() {
        assert_eq!(by_name("mall").and_then(|s| s.name), Some("Shopping Mall with Fire".into()));
        assert!(by_name("castle").is_none());
    }
}
