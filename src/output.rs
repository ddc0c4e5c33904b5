//! Fixed-capacity output batches standing in for the host engine's vector
//! allocator: one typed vector plus validity mask per projected column.

/// Column value types surfaced by the scan functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalType {
    Utf8,
    Int32,
    Int64,
    Float64,
}

/// One column of the output schema.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: &'static str,
    pub ty: LogicalType,
}

pub type Schema = Vec<ColumnDef>;

/// Sentinel column id the host uses to request the row identifier.
pub const ROW_ID_COLUMN: usize = usize::MAX;

/// Projected logical column ids, in output order.
#[derive(Debug, Clone)]
pub struct Projection(Vec<usize>);

impl Projection {
    pub fn new(columns: Vec<usize>) -> Self {
        Self(columns)
    }

    /// Project every schema column, in schema order.
    pub fn all(schema: &Schema) -> Self {
        Self((0..schema.len()).collect())
    }

    #[inline]
    pub fn columns(&self) -> &[usize] {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether any projected column id lies in `ids`.
    pub fn intersects(&self, ids: std::ops::Range<usize>) -> bool {
        self.0.iter().any(|col| ids.contains(col))
    }
}

/// A single untyped cell handed from a kernel to the emitter.
#[derive(Debug, Clone, Copy)]
pub enum Cell<'a> {
    Null,
    Str(&'a str),
    I32(i32),
    I64(i64),
    F64(f64),
}

/// Typed column vector with a validity mask.
#[derive(Debug)]
pub enum Vector {
    Utf8 { values: Vec<String>, validity: Vec<bool> },
    Int32 { values: Vec<i32>, validity: Vec<bool> },
    Int64 { values: Vec<i64>, validity: Vec<bool> },
    Float64 { values: Vec<f64>, validity: Vec<bool> },
}

impl Vector {
    fn with_capacity(ty: LogicalType, capacity: usize) -> Self {
        match ty {
            LogicalType::Utf8 => Self::Utf8{values: Vec::with_capacity(capacity), validity: Vec::with_capacity(capacity)},
            LogicalType::Int32 => Self::Int32{values: Vec::with_capacity(capacity), validity: Vec::with_capacity(capacity)},
            LogicalType::Int64 => Self::Int64{values: Vec::with_capacity(capacity), validity: Vec::with_capacity(capacity)},
            LogicalType::Float64 => Self::Float64{values: Vec::with_capacity(capacity), validity: Vec::with_capacity(capacity)},
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Utf8{validity, ..}
            | Self::Int32{validity, ..}
            | Self::Int64{validity, ..}
            | Self::Float64{validity, ..} => validity.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append one cell; `Null` writes the type's placeholder value under a
    /// cleared validity bit. Cell/vector type mismatches are programming
    /// errors.
    pub fn push(&mut self, cell: Cell) {
        match (self, cell) {
            (Self::Utf8{values, validity}, Cell::Str(v)) => {
                values.push(v.to_string());
                validity.push(true);
            }
            (Self::Utf8{values, validity}, Cell::Null) => {
                values.push(String::new());
                validity.push(false);
            }
            (Self::Int32{values, validity}, Cell::I32(v)) => {
                values.push(v);
                validity.push(true);
            }
            (Self::Int32{values, validity}, Cell::Null) => {
                values.push(0);
                validity.push(false);
            }
            (Self::Int64{values, validity}, Cell::I64(v)) => {
                values.push(v);
                validity.push(true);
            }
            (Self::Int64{values, validity}, Cell::Null) => {
                values.push(0);
                validity.push(false);
            }
            (Self::Float64{values, validity}, Cell::F64(v)) => {
                values.push(v);
                validity.push(true);
            }
            (Self::Float64{values, validity}, Cell::Null) => {
                values.push(0.0);
                validity.push(false);
            }
            (vector, cell) => panic!("type mismatch: {cell:?} pushed into {vector:?}"),
        }
    }

    pub fn utf8(&self, row: usize) -> Option<&str> {
        match self {
            Self::Utf8{values, validity} => validity[row].then(|| values[row].as_str()),
            _ => panic!("not a Utf8 vector"),
        }
    }

    pub fn i32(&self, row: usize) -> Option<i32> {
        match self {
            Self::Int32{values, validity} => validity[row].then(|| values[row]),
            _ => panic!("not an Int32 vector"),
        }
    }

    pub fn i64(&self, row: usize) -> Option<i64> {
        match self {
            Self::Int64{values, validity} => validity[row].then(|| values[row]),
            _ => panic!("not an Int64 vector"),
        }
    }

    pub fn f64(&self, row: usize) -> Option<f64> {
        match self {
            Self::Float64{values, validity} => validity[row].then(|| values[row]),
            _ => panic!("not a Float64 vector"),
        }
    }
}

/// Default batch capacity, mirroring the host engine's vector width.
pub const DEFAULT_BATCH_CAPACITY: usize = 2048;

/// Fixed-capacity row batch: one vector per projected column.
#[derive(Debug)]
pub struct OutputBatch {
    capacity: usize,
    len: usize,
    columns: Vec<Vector>,
}

impl OutputBatch {
    /// Allocate a batch for `projection` over `schema`. Row-id projections
    /// materialize as `Int64`.
    pub fn new(schema: &Schema, projection: &Projection, capacity: usize) -> Self {
        let columns = projection
            .columns()
            .iter()
            .map(|&col| {
                let ty = if col == ROW_ID_COLUMN { LogicalType::Int64 } else { schema[col].ty };
                Vector::with_capacity(ty, capacity)
            })
            .collect();
        Self{capacity, len: 0, columns}
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity - self.len
    }

    #[inline]
    pub fn column(&self, slot: usize) -> &Vector {
        &self.columns[slot]
    }

    /// Write one row: `cell_of` maps each projected logical column id to its
    /// value; the row id is filled in for `ROW_ID_COLUMN` slots.
    pub fn write_row<'a>(
        &mut self,
        projection: &Projection,
        row_id: i64,
        mut cell_of: impl FnMut(usize) -> Cell<'a>,
    ) {
        debug_assert!(!self.is_full());
        for (slot, &col) in projection.columns().iter().enumerate() {
            let cell = if col == ROW_ID_COLUMN { Cell::I64(row_id) } else { cell_of(col) };
            self.columns[slot].push(cell);
        }
        self.len += 1;
    }
}

/// Optional-value helpers keeping kernel emit closures terse.
impl<'a> Cell<'a> {
    #[inline]
    pub fn opt_str(value: Option<&'a str>) -> Self {
        value.map_or(Cell::Null, Cell::Str)
    }

    #[inline]
    pub fn opt_f64(value: Option<f64>) -> Self {
        value.map_or(Cell::Null, Cell::F64)
    }
}
