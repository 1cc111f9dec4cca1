//! Movement behavior.
//!
//! Each tick a pending `move_target` is turned into a path, then every live
//! actor walks `speed * delta` tiles along its path.

use std::time::Duration;

use crate::core::vec2::Vector;
use crate::game::area::Area;
use crate::game::state::{GameState, Movement};

/// Walk along `path` from `coords` for `speed * delta` tiles.
///
/// Waypoints are consumed in order; distance left over after reaching a
/// waypoint carries on toward the next one. Returns the new position, the
/// waypoints not yet reached, and whether the final waypoint was reached.
pub fn move_along_path(coords: Vector, path: &[Vector], speed: f64, delta: Duration) -> (Vector, Vec<Vector>, bool) {
    let mut position = coords;
    let mut budget = speed * delta.as_secs_f64();
    let mut next = 0;

    while let Some(&waypoint) = path.get(next) {
        if budget <= 0.0 {
            break;
        }
        let distance = position.distance(waypoint);
        if distance <= budget {
            position = waypoint;
            budget -= distance;
            next += 1;
        } else {
            position = position + (waypoint - position).normalize() * budget;
            budget = 0.0;
        }
    }

    (position, path[next..].to_vec(), next == path.len())
}

/// Path from the subject's position to `dest`.
///
/// A subject already on a path keeps it where possible: if the destination
/// is on the path it is truncated there, otherwise the next waypoint is kept
/// and a new path is searched from it, so movement does not stutter back to
/// the nearest tile.
pub fn find_path_for_subject(subject: &Movement, area: &Area, dest: Vector) -> Option<Vec<Vector>> {
    let dest_node = area.graph.nearest_node(dest)?;

    if let Some(&next_step) = subject.path.first() {
        if let Some(index) = subject.path.iter().position(|c| *c == dest_node.vector) {
            return Some(subject.path[..=index].to_vec());
        }

        if let Some(next_node) = area.graph.nearest_node(next_step) {
            if let Some(rest) = area.graph.find_path(next_node.id, dest_node.id) {
                let mut path = vec![next_step];
                path.extend(rest);
                return Some(path);
            }
        }
    }

    let from_node = area.graph.nearest_node(subject.coords)?;
    area.graph.find_path(from_node.id, dest_node.id)
}

/// Tick step: resolve move targets and advance every live actor.
pub fn movement_behavior(state: &mut GameState, area: &Area, delta: Duration) {
    for actor in state.actors_mut() {
        let movement = &mut actor.movement;

        // The dead don't move
        if !actor.combat.is_alive() {
            movement.halt();
            continue;
        }

        if let Some(target) = movement.move_target.take() {
            movement.path = find_path_for_subject(movement, area, target).unwrap_or_default();
        }

        if !movement.has_path() {
            continue;
        }

        let (coords, path, _) = move_along_path(movement.coords, &movement.path, movement.speed, delta);
        movement.coords = coords;
        movement.path = path;
        if let Some(&next) = movement.path.first() {
            movement.angle = coords.angle(next);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
