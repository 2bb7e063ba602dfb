use super::datum::Datum;
use super::launcher::Functor;
use super::object::PhaseContext;
use super::tags::{ElementInitLoop, ElementLoop, NeighborLoop, SideLoop};
use crate::array::{Array1D, Array2D, Element};
use crate::fe_tables::FeTables;
use crate::mesh::Mesh;
use eyre::ensure;
use log::debug;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Computes quadrature-point properties consumed by kernels and boundary conditions.
pub trait Material: Send + Sync {
    /// Whether [`init_qp_stateful_properties`](Self::init_qp_stateful_properties) is provided.
    const HAS_STATEFUL_INIT: bool = false;
    /// Whether properties are also computed on element sides and on the neighbor side of
    /// interior sides.
    const ON_SIDES: bool = false;

    fn compute_qp_properties(&self, qp: usize, datum: &mut Datum);

    fn init_qp_stateful_properties(&self, _qp: usize, _datum: &mut Datum) {}
}

/// A material as seen by the driver.
pub trait MaterialCompute: Send + Sync {
    fn name(&self) -> &str;

    fn compute_properties(&self, ctx: &PhaseContext);

    fn initialize_stateful(&self, ctx: &PhaseContext);
}

pub struct MaterialObject<M> {
    material: M,
    name: String,
    elements: Array1D<usize>,
    // (element, side) rows
    sides: Array2D<usize>,
    // (neighbor element, neighbor side) rows across interior sides
    neighbors: Array2D<usize>,
}

fn pair_array(pairs: &[(usize, usize)]) -> eyre::Result<Array2D<usize>> {
    let mut array = Array2D::from_dims(&[pairs.len(), 2])?;
    for (k, &(a, b)) in pairs.iter().enumerate() {
        array.set_at([k as isize, 0], a);
        array.set_at([k as isize, 1], b);
    }
    array.copy_to_device()?;
    Ok(array)
}

impl<M: Material> MaterialObject<M> {
    pub fn new(material: M, name: impl Into<String>, blocks: &[usize], mesh: &Mesh, tables: &FeTables) -> eyre::Result<Self> {
        let name = name.into();
        if let Some(&block) = blocks.iter().find(|&&b| b >= mesh.num_subdomains()) {
            eyre::bail!("material '{}' refers to subdomain {} which does not exist", name, block);
        }
        let elements = mesh.elements_in(blocks);
        let sides: Vec<(usize, usize)> = elements
            .iter()
            .flat_map(|&e| (0..tables.num_sides(mesh.element_type(e))).map(move |s| (e, s)))
            .collect();
        let neighbors: Vec<(usize, usize)> = mesh
            .interior_sides_in(blocks, tables)
            .into_iter()
            .filter_map(|(e, s)| mesh.neighbor(e, s))
            .collect();
        debug!(
            "material '{}' acts on {} elements and {} sides",
            name,
            elements.len(),
            sides.len()
        );
        Ok(Self {
            material,
            name,
            elements: Array1D::from_slice(&elements),
            sides: pair_array(&sides)?,
            neighbors: pair_array(&neighbors)?,
        })
    }

    pub fn material(&self) -> &M {
        &self.material
    }
}

struct MaterialWorkItem<'a, M> {
    object: &'a MaterialObject<M>,
    ctx: &'a PhaseContext<'a>,
}

impl<M: Material> MaterialWorkItem<'_, M> {
    fn compute(&self, mut datum: Datum) {
        for qp in 0..datum.num_qps() {
            self.object.material.compute_qp_properties(qp, &mut datum);
        }
    }

    fn side_datum(&self, pairs: &Array2D<usize>, index: usize) -> Datum<'_> {
        let element = pairs.at([index as isize, 0]);
        let side = pairs.at([index as isize, 1]);
        Datum::on_side(self.ctx, 0, element, side)
    }
}

impl<M: Material> Functor<ElementLoop> for MaterialWorkItem<'_, M> {
    fn call(&self, _: ElementLoop, index: usize) {
        let datum = Datum::on_element(self.ctx, 0, self.object.elements.get(index));
        self.compute(datum);
    }
}

impl<M: Material> Functor<SideLoop> for MaterialWorkItem<'_, M> {
    fn call(&self, _: SideLoop, index: usize) {
        self.compute(self.side_datum(&self.object.sides, index));
    }
}

impl<M: Material> Functor<NeighborLoop> for MaterialWorkItem<'_, M> {
    fn call(&self, _: NeighborLoop, index: usize) {
        self.compute(self.side_datum(&self.object.neighbors, index));
    }
}

impl<M: Material> Functor<ElementInitLoop> for MaterialWorkItem<'_, M> {
    fn call(&self, _: ElementInitLoop, index: usize) {
        let mut datum = Datum::on_element(self.ctx, 0, self.object.elements.get(index));
        for qp in 0..datum.num_qps() {
            self.object
                .material
                .init_qp_stateful_properties(qp, &mut datum);
        }
    }
}

impl<M: Material> MaterialCompute for MaterialObject<M> {
    fn name(&self) -> &str {
        &self.name
    }

    fn compute_properties(&self, ctx: &PhaseContext) {
        let item = MaterialWorkItem { object: self, ctx };
        ctx.dispatcher
            .parallel_for::<ElementLoop, _>(&item, self.elements.size());
        if M::ON_SIDES {
            ctx.dispatcher
                .parallel_for::<SideLoop, _>(&item, self.sides.n(0));
            ctx.dispatcher
                .parallel_for::<NeighborLoop, _>(&item, self.neighbors.n(0));
        } else {
            ctx.dispatcher.skip::<SideLoop>(&self.name);
            ctx.dispatcher.skip::<NeighborLoop>(&self.name);
        }
    }

    fn initialize_stateful(&self, ctx: &PhaseContext) {
        if M::HAS_STATEFUL_INIT {
            let item = MaterialWorkItem { object: self, ctx };
            ctx.dispatcher
                .parallel_for::<ElementInitLoop, _>(&item, self.elements.size());
        } else {
            ctx.dispatcher.skip::<ElementInitLoop>(&self.name);
        }
    }
}

/// Storage for a property at every volume (or every side) quadrature point.
///
/// Stateful properties keep the values of the previous step. [`swap_old`](Self::swap_old)
/// exchanges the roles of the two buffers without copying.
#[derive(Debug)]
pub struct MaterialProperty<T> {
    slots: [Array1D<T>; 2],
    current: AtomicUsize,
    face: bool,
}

impl<T: Element> MaterialProperty<T> {
    /// A property at every volume quadrature point.
    pub fn volume(mesh: &Mesh) -> eyre::Result<Self> {
        Self::with_len(mesh.total_qps(), false)
    }

    /// A property at every side quadrature point.
    pub fn face(mesh: &Mesh) -> eyre::Result<Self> {
        Self::with_len(mesh.total_face_qps(), true)
    }

    fn with_len(len: usize, face: bool) -> eyre::Result<Self> {
        Ok(Self {
            slots: [Array1D::from_dims(&[len])?, Array1D::new()],
            current: AtomicUsize::new(0),
            face,
        })
    }

    /// Allocates storage for the previous step's values.
    pub fn stateful(mut self) -> eyre::Result<Self> {
        ensure!(!self.is_stateful(), "MaterialProperty: property is already stateful");
        let len = self.slots[0].size();
        self.slots[1] = Array1D::from_dims(&[len])?;
        Ok(self)
    }

    pub fn is_stateful(&self) -> bool {
        self.slots[1].is_init()
    }

    pub fn len(&self) -> usize {
        self.slots[0].size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn index(&self, datum: &Datum, qp: usize) -> usize {
        assert_eq!(
            datum.is_side(),
            self.face,
            "MaterialProperty: volume and face properties cannot be mixed"
        );
        datum.qp_offset() + qp
    }

    fn current_slot(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    pub fn current(&self) -> &Array1D<T> {
        &self.slots[self.current_slot()]
    }

    /// # Panics
    ///
    /// Panics if the property is not stateful.
    pub fn old_values(&self) -> &Array1D<T> {
        assert!(self.is_stateful(), "MaterialProperty: property is not stateful");
        &self.slots[1 - self.current_slot()]
    }

    pub fn get(&self, datum: &Datum, qp: usize) -> T {
        self.current().get(self.index(datum, qp))
    }

    pub fn old(&self, datum: &Datum, qp: usize) -> T {
        self.old_values().get(self.index(datum, qp))
    }

    /// Stores the value at a quadrature point of the datum.
    ///
    /// Must only be called from the work-item that owns the datum's element or side.
    pub fn set(&self, datum: &Datum, qp: usize, value: T) {
        let index = self.index(datum, qp);
        // Work-items own the quadrature points of their element or side
        unsafe { self.current().write(index, value) };
    }

    /// Stores the previous step's value at a quadrature point of the datum.
    pub fn set_old(&self, datum: &Datum, qp: usize, value: T) {
        let index = self.index(datum, qp);
        unsafe { self.old_values().write(index, value) };
    }

    /// Makes the current values the previous step's values. Must not overlap a parallel
    /// region that accesses the property.
    pub fn swap_old(&self) {
        if self.is_stateful() {
            self.current.fetch_xor(1, Ordering::Relaxed);
        }
    }
}

/// A property whose history advances between steps.
pub trait StatefulProperty: Send + Sync {
    fn swap_old(&self);
}

impl<T: Element> StatefulProperty for MaterialProperty<T> {
    fn swap_old(&self) {
        MaterialProperty::swap_old(self)
    }
}
