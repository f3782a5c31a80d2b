/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use ahash::AHashSet;
use calcard::icalendar::{
    ICalendar, ICalendarComponent, ICalendarComponentType, ICalendarEntry, ICalendarParameter,
    ICalendarParameterName, ICalendarProperty, ICalendarValue,
};

/// A single edit applied to a stored object.
///
/// Entry and component positions refer to the object as it was before any
/// action was applied. Parameter edits must precede entry removals on the same
/// component.
#[derive(Debug)]
pub enum MergeAction {
    AddEntries {
        component_id: u16,
        entries: Vec<ICalendarEntry>,
    },
    RemoveEntries {
        component_id: u16,
        entries: AHashSet<ICalendarProperty>,
    },
    RemoveEntryIds {
        component_id: u16,
        entry_ids: Vec<u16>,
    },
    ReplaceEntries {
        component_id: u16,
        entries: Vec<ICalendarEntry>,
    },
    AddParameters {
        component_id: u16,
        entry_id: u16,
        parameters: Vec<ICalendarParameter>,
    },
    RemoveParameters {
        component_id: u16,
        entry_id: u16,
        parameters: Vec<ICalendarParameterName>,
    },
    AddComponent {
        component: ICalendarComponent,
        children: Vec<ICalendarComponent>,
    },
    RemoveComponent {
        component_id: u16,
    },
}

impl MergeAction {
    pub fn set_sequence(component_id: u16, sequence: i64) -> [MergeAction; 2] {
        [
            MergeAction::RemoveEntries {
                component_id,
                entries: [ICalendarProperty::Sequence].into_iter().collect(),
            },
            MergeAction::AddEntries {
                component_id,
                entries: vec![ICalendarEntry {
                    name: ICalendarProperty::Sequence,
                    params: vec![],
                    values: vec![ICalendarValue::Integer(sequence)],
                }],
            },
        ]
    }
}

pub fn itip_merge_changes(ical: &mut ICalendar, changes: Vec<MergeAction>) {
    let mut remove_component_ids: Vec<u32> = Vec::new();
    for action in changes {
        match action {
            MergeAction::AddEntries {
                component_id,
                entries,
            } => {
                if let Some(component) = ical.components.get_mut(component_id as usize) {
                    component.entries.extend(entries);
                }
            }
            MergeAction::RemoveEntries {
                component_id,
                entries,
            } => {
                if let Some(component) = ical.components.get_mut(component_id as usize) {
                    component
                        .entries
                        .retain(|entry| !entries.contains(&entry.name));
                }
            }
            MergeAction::RemoveEntryIds {
                component_id,
                entry_ids,
            } => {
                if let Some(component) = ical.components.get_mut(component_id as usize) {
                    let mut entry_id = 0u16;
                    component.entries.retain(|_| {
                        let keep = !entry_ids.contains(&entry_id);
                        entry_id += 1;
                        keep
                    });
                }
            }
            MergeAction::ReplaceEntries {
                component_id,
                entries,
            } => {
                if let Some(component) = ical.components.get_mut(component_id as usize) {
                    component.entries = entries;
                }
            }
            MergeAction::AddParameters {
                component_id,
                entry_id,
                parameters,
            } => {
                if let Some(entry) = ical
                    .components
                    .get_mut(component_id as usize)
                    .and_then(|comp| comp.entries.get_mut(entry_id as usize))
                {
                    entry.params.extend(parameters);
                }
            }
            MergeAction::RemoveParameters {
                component_id,
                entry_id,
                parameters,
            } => {
                if let Some(entry) = ical
                    .components
                    .get_mut(component_id as usize)
                    .and_then(|comp| comp.entries.get_mut(entry_id as usize))
                {
                    entry
                        .params
                        .retain(|param| !parameters.contains(&param.name));
                }
            }
            MergeAction::AddComponent {
                mut component,
                children,
            } => {
                let comp_id = ical.components.len() as u32;
                if let Some(root) = ical
                    .components
                    .get_mut(0)
                    .filter(|c| c.component_type == ICalendarComponentType::VCalendar)
                {
                    root.component_ids.push(comp_id);
                    component.component_ids = (0..children.len() as u32)
                        .map(|idx| comp_id + 1 + idx)
                        .collect();
                    ical.components.push(component);
                    ical.components.extend(children);
                }
            }
            MergeAction::RemoveComponent { component_id } => {
                remove_component_ids.push(component_id as u32);
            }
        }
    }

    if !remove_component_ids.is_empty() {
        ical.remove_component_ids(&remove_component_ids);
    }
}
