use anyhow::{anyhow, bail};
use serde::{Deserialize, Serialize};

/// Flat collections that sit outside the per-track catalog trees.
pub const USER_PROFILES: &str = "userProfiles";
pub const RESPONSE_SHEETS: &str = "responseSheets";

pub const NOTICE_BOARDS: &[&str] = &["job", "scholarship", "day", "exam"];

pub fn notice_board_key(board: &str) -> anyhow::Result<String> {
    if !NOTICE_BOARDS.contains(&board) {
        bail!("unknown notice board: {}", board);
    }
    Ok(format!("notices/{}", board))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Track {
    Ssc,
    Intermediate,
    Btech,
    Degree,
    Pg,
    Medical,
}

impl Track {
    pub fn all() -> &'static [Track] {
        &[
            Track::Ssc,
            Track::Intermediate,
            Track::Btech,
            Track::Degree,
            Track::Pg,
            Track::Medical,
        ]
    }

    pub fn key(self) -> &'static str {
        match self {
            Track::Ssc => "ssc",
            Track::Intermediate => "intermediate",
            Track::Btech => "btech",
            Track::Degree => "degree",
            Track::Pg => "pg",
            Track::Medical => "medical",
        }
    }

    pub fn from_key(key: &str) -> Option<Track> {
        Track::all().iter().copied().find(|t| t.key() == key)
    }

    /// Level layout from root to leaf. Quiz is always the leaf; the
    /// course/semester levels exist only for the deeper tracks.
    pub fn levels(self) -> &'static [Level] {
        match self {
            Track::Ssc | Track::Medical => &[Level::Group, Level::Subject, Level::Unit, Level::Quiz],
            Track::Intermediate => &[
                Level::Group,
                Level::Course,
                Level::Subject,
                Level::Unit,
                Level::Quiz,
            ],
            Track::Btech | Track::Degree | Track::Pg => &[
                Level::Group,
                Level::Course,
                Level::Semester,
                Level::Subject,
                Level::Unit,
                Level::Quiz,
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Group,
    Course,
    Semester,
    Subject,
    Unit,
    Quiz,
}

impl Level {
    pub fn key(self) -> &'static str {
        match self {
            Level::Group => "group",
            Level::Course => "course",
            Level::Semester => "semester",
            Level::Subject => "subject",
            Level::Unit => "unit",
            Level::Quiz => "quiz",
        }
    }

    pub fn collection(self) -> &'static str {
        match self {
            Level::Group => "groups",
            Level::Course => "courses",
            Level::Semester => "semesters",
            Level::Subject => "subjects",
            Level::Unit => "units",
            Level::Quiz => "quizzes",
        }
    }

    /// The display-name field that carries the sibling-uniqueness guarantee.
    pub fn name_field(self) -> &'static str {
        match self {
            Level::Group => "name",
            Level::Course => "courseName",
            Level::Semester => "semesterName",
            Level::Subject => "subjectName",
            Level::Unit => "unitName",
            Level::Quiz => "quizTitle",
        }
    }
}

/// Addresses one child collection in a track's tree: the collection directly
/// below `parent_ids.last()` (or the root collection when `parent_ids` is
/// empty). Depth is validated at construction, so a `CollectionRef` can never
/// point between levels or past the leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRef {
    track: Track,
    parent_ids: Vec<String>,
}

impl CollectionRef {
    pub fn new(track: Track, parent_ids: Vec<String>) -> anyhow::Result<CollectionRef> {
        let depth = track.levels().len();
        if parent_ids.len() >= depth {
            bail!(
                "{} supports {} catalog levels, got {} parent ids",
                track.key(),
                depth,
                parent_ids.len()
            );
        }
        if parent_ids.iter().any(|id| id.is_empty()) {
            bail!("empty id in catalog path");
        }
        Ok(CollectionRef { track, parent_ids })
    }

    pub fn track(&self) -> Track {
        self.track
    }

    pub fn level(&self) -> Level {
        self.track.levels()[self.parent_ids.len()]
    }

    /// Canonical storage key, e.g.
    /// `degree/groups/<gid>/courses/<cid>/semesters/<sid>/subjects`.
    pub fn storage_key(&self) -> String {
        let levels = self.track.levels();
        let mut key = String::from(self.track.key());
        for (i, id) in self.parent_ids.iter().enumerate() {
            key.push('/');
            key.push_str(levels[i].collection());
            key.push('/');
            key.push_str(id);
        }
        key.push('/');
        key.push_str(self.level().collection());
        key
    }

    pub fn node(&self, id: &str) -> anyhow::Result<NodePath> {
        let mut ids = self.parent_ids.clone();
        ids.push(id.to_string());
        NodePath::new(self.track, ids)
    }
}

/// Addresses one document in a track's tree. The number of ids determines
/// the level: `[group]` is a group, `[group, subject]` a subject (for the
/// shallow tracks), and so on down to a quiz.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePath {
    track: Track,
    ids: Vec<String>,
}

impl NodePath {
    pub fn new(track: Track, ids: Vec<String>) -> anyhow::Result<NodePath> {
        let depth = track.levels().len();
        if ids.is_empty() || ids.len() > depth {
            bail!(
                "{} catalog paths take 1..={} ids, got {}",
                track.key(),
                depth,
                ids.len()
            );
        }
        if ids.iter().any(|id| id.is_empty()) {
            bail!("empty id in catalog path");
        }
        Ok(NodePath { track, ids })
    }

    pub fn track(&self) -> Track {
        self.track
    }

    pub fn level(&self) -> Level {
        self.track.levels()[self.ids.len() - 1]
    }

    pub fn doc_id(&self) -> &str {
        self.ids.last().map(|s| s.as_str()).unwrap_or_default()
    }

    /// The collection this document lives in.
    pub fn collection(&self) -> CollectionRef {
        CollectionRef {
            track: self.track,
            parent_ids: self.ids[..self.ids.len() - 1].to_vec(),
        }
    }

    /// The collection of this node's children, or `None` at the quiz leaf.
    pub fn child_collection(&self) -> Option<CollectionRef> {
        if self.ids.len() >= self.track.levels().len() {
            return None;
        }
        Some(CollectionRef {
            track: self.track,
            parent_ids: self.ids.clone(),
        })
    }

    /// Storage key of the quiz's `responses` sub-collection.
    pub fn responses_key(&self) -> anyhow::Result<String> {
        if self.level() != Level::Quiz {
            return Err(anyhow!(
                "responses live under quizzes, not {}",
                self.level().key()
            ));
        }
        Ok(format!(
            "{}/{}/responses",
            self.collection().storage_key(),
            self.doc_id()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_layouts_have_expected_depths() {
        assert_eq!(Track::Ssc.levels().len(), 4);
        assert_eq!(Track::Medical.levels().len(), 4);
        assert_eq!(Track::Intermediate.levels().len(), 5);
        assert_eq!(Track::Btech.levels().len(), 6);
        assert_eq!(Track::Degree.levels().len(), 6);
        assert_eq!(Track::Pg.levels().len(), 6);
        for t in Track::all() {
            assert_eq!(*t.levels().last().unwrap(), Level::Quiz);
        }
    }

    #[test]
    fn collection_keys_interleave_levels_and_ids() {
        let root = CollectionRef::new(Track::Degree, vec![]).unwrap();
        assert_eq!(root.level(), Level::Group);
        assert_eq!(root.storage_key(), "degree/groups");

        let subjects = CollectionRef::new(
            Track::Degree,
            vec!["g1".into(), "c1".into(), "s1".into()],
        )
        .unwrap();
        assert_eq!(subjects.level(), Level::Subject);
        assert_eq!(
            subjects.storage_key(),
            "degree/groups/g1/courses/c1/semesters/s1/subjects"
        );
    }

    #[test]
    fn node_paths_validate_depth() {
        assert!(NodePath::new(Track::Ssc, vec![]).is_err());
        assert!(NodePath::new(
            Track::Ssc,
            vec!["a".into(), "b".into(), "c".into(), "d".into(), "e".into()]
        )
        .is_err());

        let unit = NodePath::new(Track::Ssc, vec!["g".into(), "s".into(), "u".into()]).unwrap();
        assert_eq!(unit.level(), Level::Unit);
        assert_eq!(unit.collection().storage_key(), "ssc/groups/g/subjects/s/units");
        assert_eq!(
            unit.child_collection().unwrap().storage_key(),
            "ssc/groups/g/subjects/s/units/u/quizzes"
        );

        let quiz = unit.child_collection().unwrap().node("7").unwrap();
        assert_eq!(quiz.level(), Level::Quiz);
        assert!(quiz.child_collection().is_none());
        assert_eq!(
            quiz.responses_key().unwrap(),
            "ssc/groups/g/subjects/s/units/u/quizzes/7/responses"
        );
        assert!(unit.responses_key().is_err());
    }

    #[test]
    fn notice_boards_are_closed_set() {
        assert_eq!(notice_board_key("job").unwrap(), "notices/job");
        assert!(notice_board_key("gossip").is_err());
    }
}
