mod ops;
mod stage;

pub use stage::{Query, Stage, StageRef};

pub(crate) use ops::{
    distinct_by, except_by, filter, flat_map, group_by, intersect_by, join, map, skip, skip_last,
    skip_while, sort, take, take_last, take_while, union_by, zip2, zip3, Comparer,
};
